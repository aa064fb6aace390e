use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::merge::MetadataService;
use crate::model::{MetadataCandidate, MetadataRecord, Ratings};
use crate::util::env::{env_opt, env_req};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const IGDB_GAMES_ENDPOINT: &str = "https://api.igdb.com/v4/games";
const SEARCH_LIMIT: usize = 5;
/// IGDB theme id of "Erotic"; flags the game instead of becoming a tag.
const EROTIC_THEME_ID: i64 = 42;
const GAME_FIELDS: &str = "id, name, slug, rating, rating_count, aggregated_rating, \
    aggregated_rating_count, total_rating, total_rating_count, summary, first_release_date, \
    genres.name, themes.id, themes.name, involved_companies.company.name, \
    involved_companies.developer, cover.url";

#[derive(Debug, Clone, Deserialize)]
struct IgdbImage {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbNamed {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbInvolvedCompany {
    #[serde(default)]
    company: Option<IgdbNamed>,
    #[serde(default)]
    developer: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbGame {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    first_release_date: Option<i64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    aggregated_rating: Option<f64>,
    #[serde(default)]
    total_rating: Option<f64>,
    #[serde(default)]
    total_rating_count: Option<i64>,
    #[serde(default)]
    genres: Vec<IgdbNamed>,
    #[serde(default)]
    themes: Vec<IgdbNamed>,
    #[serde(default)]
    involved_companies: Vec<IgdbInvolvedCompany>,
    #[serde(default)]
    cover: Option<IgdbImage>,
}

impl IgdbGame {
    fn candidate(&self) -> Option<MetadataCandidate> {
        Some(MetadataCandidate {
            id: self.id,
            title: self.name.clone()?,
            release_year: self
                .first_release_date
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| chrono::Datelike::year(&dt)),
        })
    }

    fn into_record(self) -> MetadataRecord {
        let nsfw = self.themes.iter().any(|t| t.id == Some(EROTIC_THEME_ID));
        let genres = self
            .genres
            .iter()
            .chain(self.themes.iter().filter(|t| t.id != Some(EROTIC_THEME_ID)))
            .filter_map(|g| g.name.clone())
            .collect();
        let developers = self
            .involved_companies
            .iter()
            .filter(|c| c.developer)
            .filter_map(|c| c.company.as_ref()?.name.clone())
            .collect();
        MetadataRecord {
            id: self.id,
            title: self.name.unwrap_or_default(),
            slug: self.slug,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            developers,
            genres,
            release_date: self
                .first_release_date
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive()),
            cover_url: self.cover.and_then(|c| c.url).map(|u| cover_url(&u)),
            ratings: Ratings {
                community: self.rating,
                critic: self.aggregated_rating,
                aggregated: self.total_rating,
            },
            popularity: self.total_rating_count.map(|c| c as f64),
            nsfw,
        }
    }
}

/// IGDB hands out protocol-relative thumbnails; ask for the large cover over https.
fn cover_url(raw: &str) -> String {
    let sized = raw.replace("t_thumb", "t_cover_big");
    if sized.starts_with("//") {
        format!("https:{sized}")
    } else if sized.starts_with("http") {
        sized
    } else {
        format!("https://{sized}")
    }
}

/// Title as sent to the `search` clause: parentheticals, bracketed tags and
/// trademark signs removed, quotes stripped so the query stays well-formed.
fn search_term(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth = 0usize;
    for c in title.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '™' | '®' | '©' | '"' | '\\' => {}
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct IgdbToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct IgdbClient {
    http: Client,
    client_id: String,
    client_secret: String,
    games_endpoint: String,
    token: Arc<Mutex<Option<IgdbToken>>>,
}

impl std::fmt::Debug for IgdbClient {
    // SECURITY: the client secret and bearer token stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgdbClient")
            .field("client_id", &self.client_id)
            .field("games_endpoint", &self.games_endpoint)
            .finish_non_exhaustive()
    }
}

impl IgdbClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let user_agent = env_opt("IGDB_USER_AGENT").unwrap_or_else(|| "backlogia/0.1".to_string());
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to construct IGDB HTTP client")?;
        Ok(Self {
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            games_endpoint: IGDB_GAMES_ENDPOINT.to_string(),
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn new_from_env() -> Result<Self> {
        let client_id = env_req("TWITCH_CLIENT_ID").context("TWITCH_CLIENT_ID is required for IGDB")?;
        let client_secret =
            env_req("TWITCH_CLIENT_SECRET").context("TWITCH_CLIENT_SECRET is required for IGDB")?;
        Self::new(client_id, client_secret)
    }

    async fn ensure_token(&self) -> Result<String> {
        {
            let guard = self.token.lock().await;
            if let Some(token) = guard.as_ref() {
                if token.expires_at > Instant::now() + Duration::from_secs(30) {
                    return Ok(token.access_token.clone());
                }
            }
        }
        let token = self.request_new_token().await?;
        let mut guard = self.token.lock().await;
        *guard = Some(token.clone());
        Ok(token.access_token)
    }

    async fn request_new_token(&self) -> Result<IgdbToken> {
        let response = self
            .http
            .post(TWITCH_TOKEN_URL)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("requesting Twitch OAuth token")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("twitch token request failed (status={status}): {text}"));
        }
        let token: TwitchTokenResponse = response.json().await?;
        let ttl = token.expires_in.saturating_sub(30).max(30);
        debug!(target = "igdb", ttl_secs = ttl, "obtained twitch access token");
        Ok(IgdbToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(ttl),
        })
    }

    /// One APIcalypse query. Non-2xx answers are "no match", never retried.
    async fn query<T: DeserializeOwned>(&self, body: String) -> Result<Vec<T>> {
        let token = self.ensure_token().await?;
        let resp = self
            .http
            .post(&self.games_endpoint)
            .header("Client-ID", &self.client_id)
            .header("Content-Type", "text/plain")
            .header("Authorization", format!("Bearer {token}"))
            .body(body)
            .send()
            .await
            .context("igdb request")?;
        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                *self.token.lock().await = None;
            }
            let text = resp.text().await.unwrap_or_default();
            warn!(target = "igdb", %status, body = %text, "igdb request rejected");
            return Ok(Vec::new());
        }
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|err| anyhow!("failed to parse IGDB payload ({err}): {text}"))
    }
}

#[async_trait]
impl MetadataService for IgdbClient {
    #[instrument(skip(self))]
    async fn search_by_title(&self, title: &str) -> Result<Vec<MetadataCandidate>> {
        let term = search_term(title);
        if term.is_empty() {
            return Ok(Vec::new());
        }
        let games: Vec<IgdbGame> = self
            .query(format!("search \"{term}\"; fields {GAME_FIELDS}; limit {SEARCH_LIMIT};"))
            .await?;
        debug!(target = "igdb", term = %term, hits = games.len(), "igdb search");
        Ok(games.iter().filter_map(IgdbGame::candidate).collect())
    }

    #[instrument(skip(self))]
    async fn fetch_by_id(&self, id: i64) -> Result<Option<MetadataRecord>> {
        let games: Vec<IgdbGame> = self
            .query(format!("where id = {id}; fields {GAME_FIELDS};"))
            .await?;
        Ok(games.into_iter().next().map(IgdbGame::into_record))
    }
}
