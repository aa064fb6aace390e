// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (never authenticated)
        .route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/v1")
                // Library browsing
                .route("/library", web::get().to(handlers::list_library))
                // Bulk edits, ahead of the `{id}` routes they would otherwise shadow
                .route("/games/bulk/hide", web::post().to(handlers::bulk_hide))
                .route("/games/bulk/nsfw", web::post().to(handlers::bulk_nsfw))
                .route("/games/{id}", web::get().to(handlers::get_game))
                .route("/games/{id}/hide", web::post().to(handlers::set_hidden))
                .route("/games/{id}/nsfw", web::post().to(handlers::set_nsfw))
                .route("/games/{id}/igdb", web::post().to(handlers::set_igdb))
                .route("/games/{id}/override", web::put().to(handlers::set_override))
                .route(
                    "/games/{id}/stores/{store}",
                    web::delete().to(handlers::remove_ownership),
                )
                .route("/games/{id}/enrich", web::post().to(handlers::enrich_game))
                .route(
                    "/games/{id}/collections",
                    web::get().to(handlers::game_collections),
                )
                // Ingestion and enrichment
                .route("/import/{store}", web::post().to(handlers::import_store))
                .route("/enrich", web::post().to(handlers::run_enrichment))
                // Discovery
                .route("/discover", web::get().to(handlers::discover))
                .route("/discover/random", web::get().to(handlers::random_game))
                .route("/stats", web::get().to(handlers::stats))
                // Collections
                .route("/collections", web::get().to(handlers::list_collections))
                .route("/collections", web::post().to(handlers::create_collection))
                .route("/collections/{id}", web::get().to(handlers::get_collection))
                .route("/collections/{id}", web::put().to(handlers::update_collection))
                .route(
                    "/collections/{id}",
                    web::delete().to(handlers::delete_collection),
                )
                .route(
                    "/collections/{id}/games",
                    web::post().to(handlers::add_collection_game),
                )
                .route(
                    "/collections/{id}/games/{game_id}",
                    web::delete().to(handlers::remove_collection_game),
                )
                .route(
                    "/collections/{id}/order",
                    web::put().to(handlers::reorder_collection),
                ),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::Auth;
    use crate::api::middleware::json_config;
    use crate::api::server::AppState;
    use crate::config::LibraryConfig;
    use crate::database_ops::db::Db;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    async fn state() -> web::Data<AppState> {
        let db = Db::connect_memory().await.unwrap();
        web::Data::new(AppState::new(db, LibraryConfig::default(), None))
    }

    #[actix_web::test]
    async fn import_then_browse() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .app_data(json_config())
                .wrap(Auth::new(None))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/import/gog")
            .set_json(json!({"games": [
                {"title": "Inside", "id": 1},
                {"title": "Limbo", "id": 2},
                {"id": 3}
            ]}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["created"], 2);
        assert_eq!(body["data"]["skipped"], 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/library?sort=title&order=desc")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let titles: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["game"]["canonical_title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Limbo", "Inside"]);

        let req = test::TestRequest::get().uri("/api/v1/games/9999").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/api/v1/import/myspace").set_json(json!({"games": []})).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn flag_and_igdb_edits() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .app_data(json_config())
                .configure(configure_routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/v1/import/steam")
            .set_json(json!({"games": [
                {"title": "Hades", "appid": 1145360},
                {"title": "Celeste", "appid": 504230}
            ]}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["created"], 2);
        let req = test::TestRequest::get().uri("/api/v1/library").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let ids: Vec<i64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["game"]["id"].as_i64().unwrap())
            .collect();

        let req = test::TestRequest::post()
            .uri("/api/v1/games/bulk/hide")
            .set_json(json!({"game_ids": ids}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["updated"], 2);

        let req = test::TestRequest::post()
            .uri("/api/v1/games/bulk/nsfw")
            .set_json(json!({"game_ids": []}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/games/{}/nsfw", ids[0]))
            .set_json(json!({"nsfw": true}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["game"]["nsfw"], true);
        assert_eq!(body["data"]["game"]["hidden"], true);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/games/{}/igdb", ids[0]))
            .set_json(json!({"igdb_id": 113112}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["game"]["igdb_id"], 113112);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/games/{}/igdb", ids[0]))
            .set_json(json!({"igdb_id": null}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["data"]["game"]["igdb_id"].is_null());

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/games/{}/igdb", ids[0]))
            .set_json(json!({"igdb_id": -4}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/games/9999/nsfw")
            .set_json(json!({"nsfw": false}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn enrichment_without_service_is_rejected() {
        let app = test::init_service(App::new().app_data(state().await).configure(configure_routes)).await;
        let req = test::TestRequest::post().uri("/api/v1/enrich").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn secret_guards_mutations_only() {
        let app = test::init_service(
            App::new()
                .app_data(state().await)
                .wrap(Auth::new(Some("s3cret".into())))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/stats").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/v1/collections")
            .set_json(json!({"name": "Backlog"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/v1/collections")
            .insert_header(("Authorization", "Bearer s3cret"))
            .set_json(json!({"name": "Backlog"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }
}
