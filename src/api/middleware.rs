// Additional middleware for logging, CORS, etc.

use actix_web::middleware::{Compress, Logger};
use actix_web::{error, web, HttpResponse};

use crate::api::models::ApiResponse;

/// Bookmarklet exports of large libraries easily exceed actix's 32 KiB default.
const MAX_JSON_BYTES: usize = 16 * 1024 * 1024;

pub fn setup_middleware() -> (Logger, Compress) {
    let logger = Logger::default();
    let compress = Compress::default();
    (logger, compress)
}

/// JSON body limits, with malformed bodies answered in the standard envelope.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| {
            let response = HttpResponse::BadRequest().json(ApiResponse::<()>::error(err.to_string()));
            error::InternalError::from_response(err, response).into()
        })
}

// CORS configuration
use actix_cors::Cors;
use actix_web::http::header;

pub fn setup_cors(allowed_origins: &str) -> Cors {
    let origins: Vec<&str> = allowed_origins.split(',').collect();

    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .max_age(3600);

    for origin in origins.into_iter().map(str::trim).filter(|o| !o.is_empty()) {
        cors = cors.allowed_origin(origin);
    }

    cors
}
