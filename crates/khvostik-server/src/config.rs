use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

/// Placeholder JWT secrets that must be replaced before going live.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

const DEFAULT_SECRET: &str = "dev-secret-change-me";

/// Everything the server reads from `KHVOSTIK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub media_dir: PathBuf,
    pub admin_email: Option<String>,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub geocoder_timeout: Duration,
    pub region: String,
    pub country: String,
    pub public_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `var` gets the full
    /// variable name, e.g. `KHVOSTIK_PORT`.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            var(&format!("KHVOSTIK_{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let host = get_or("HOST", "0.0.0.0");
        let port: u16 = get_or("PORT", "3000")
            .parse()
            .context("KHVOSTIK_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("KHVOSTIK_HOST must be an IP address")?;

        let jwt_secret = get_or("JWT_SECRET", DEFAULT_SECRET);
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            warn!("KHVOSTIK_JWT_SECRET is unset or still a placeholder; tokens can be forged");
        }

        let geocoder_timeout_secs: u64 = get_or("GEOCODER_TIMEOUT_SECS", "10")
            .parse()
            .context("KHVOSTIK_GEOCODER_TIMEOUT_SECS must be a whole number of seconds")?;

        Ok(Self {
            addr,
            db_path: get_or("DB_PATH", "khvostik.db").into(),
            jwt_secret,
            media_dir: get_or("MEDIA_DIR", "./media").into(),
            admin_email: get("ADMIN_EMAIL").map(|e| e.to_lowercase()),
            geocoder_url: get_or("GEOCODER_URL", "https://nominatim.openstreetmap.org"),
            geocoder_user_agent: get_or("GEOCODER_USER_AGENT", "khvostik-alert/0.4"),
            geocoder_timeout: Duration::from_secs(geocoder_timeout_secs),
            region: get_or("REGION", "Краснодарский край"),
            country: get_or("COUNTRY", "Россия"),
            public_url: get_or("PUBLIC_URL", &format!("http://localhost:{port}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("KHVOSTIK_{k}"), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr.port(), 3000);
        assert_eq!(cfg.db_path, PathBuf::from("khvostik.db"));
        assert_eq!(cfg.region, "Краснодарский край");
        assert_eq!(cfg.admin_email, None);
        assert_eq!(cfg.public_url, "http://localhost:3000");
        assert_eq!(cfg.geocoder_timeout, Duration::from_secs(10));
    }

    #[test]
    fn overrides_and_blank_values() {
        let cfg = config(&[
            ("PORT", "8080"),
            ("ADMIN_EMAIL", " Admin@Example.com "),
            ("REGION", "   "),
            ("GEOCODER_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.admin_email.as_deref(), Some("admin@example.com"));
        assert_eq!(cfg.region, "Краснодарский край");
        assert_eq!(cfg.geocoder_timeout, Duration::from_secs(3));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("GEOCODER_TIMEOUT_SECS", "-1")]).is_err());
        assert!(config(&[("HOST", "not a host")]).is_err());
    }
}
