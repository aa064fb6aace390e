//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::{info, warn};

static INIT: Once = Once::new();

pub const DEFAULT_DATABASE_URL: &str = "sqlite://backlogia.db";

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback. Unparseable values are logged and ignored.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!(target = "env", key, value = %raw, "unparseable value; using default");
            default
        }),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Optional parsed value.
pub fn env_parse_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    init_env();
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Comma-separated list; blanks dropped.
pub fn env_list(key: &str) -> Vec<String> {
    env_opt(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Library database URL (tries specific -> generic), defaulting to a file next to the binary.
/// Bare paths are turned into `sqlite://` URLs.
pub fn db_url() -> String {
    init_env();
    let raw = ["LIBRARY_DB", "DATABASE_URL"]
        .iter()
        .find_map(|k| env_opt(k))
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
    if raw.starts_with("sqlite:") {
        raw
    } else {
        format!("sqlite://{raw}")
    }
}

fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD")
        || k.contains("SECRET")
        || k.contains("KEY")
        || k.contains("TOKEN")
        || k.contains("COOKIE")
    {
        return "***".to_string();
    }
    val.trim().to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|k| {
            let v = env_opt(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_secrets_only() {
        assert_eq!(redact_value("TWITCH_CLIENT_SECRET", "abc"), "***");
        assert_eq!(redact_value("API_PORT", " 8080 "), "8080");
    }

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("BACKLOGIA_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("BACKLOGIA_TEST_PARSE", 7u32), 7);
        std::env::set_var("BACKLOGIA_TEST_PARSE", " 12 ");
        assert_eq!(env_parse("BACKLOGIA_TEST_PARSE", 7u32), 12);
        std::env::set_var("BACKLOGIA_TEST_LIST", "a, ,b");
        assert_eq!(env_list("BACKLOGIA_TEST_LIST"), vec!["a", "b"]);
    }
}
