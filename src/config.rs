use anyhow::Result;
use std::env;
use std::time::Duration;

/// Central configuration loaded from environment variables.
///
/// All secrets come from env vars (never hardcoded). The .env file
/// is loaded automatically at startup via dotenvy.
pub struct Config {
    pub db_path: String,
    pub credentials: Vec<CredentialConfig>,
    pub upstream_base_url: String,

    pub per_credential_rate_per_sec: u32,
    pub per_ip_rate_per_min: u32,
    pub per_ip_burst: u32,

    pub max_concurrent_scans: usize,
    pub min_interval_per_region: Duration,

    pub engagement_window_days: u32,
}

/// One upstream credential read out of the environment. Shape mirrors the
/// persisted `Credential` entity, minus the fields only the store derives
/// (status, last_used_at, ...).
pub struct CredentialConfig {
    pub name: String,
    pub secret: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Only `db_path` and the tunables have defaults — upstream credentials
    /// are required for anything beyond `init` and `status`.
    pub fn load() -> Result<Self> {
        let credentials = env::var("WALLWATCH_CREDENTIALS")
            .unwrap_or_default()
            .split(',')
            .filter_map(|entry| {
                let entry = entry.trim();
                if entry.is_empty() {
                    return None;
                }
                let (name, secret) = entry.split_once(':')?;
                Some(CredentialConfig {
                    name: name.to_string(),
                    secret: secret.to_string(),
                })
            })
            .collect();

        Ok(Self {
            db_path: env::var("WALLWATCH_DB_PATH")
                .unwrap_or_else(|_| "./wallwatch.db".to_string()),
            credentials,
            upstream_base_url: env::var("WALLWATCH_UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "https://api.vk.com/method".to_string()),
            per_credential_rate_per_sec: env_parse("WALLWATCH_CREDENTIAL_RATE_PER_SEC", 3),
            per_ip_rate_per_min: env_parse("WALLWATCH_IP_RATE_PER_MIN", 100),
            per_ip_burst: env_parse("WALLWATCH_IP_BURST", 20),
            max_concurrent_scans: env_parse("WALLWATCH_MAX_CONCURRENT_SCANS", 2),
            min_interval_per_region: Duration::from_secs(60 * env_parse::<u64>("WALLWATCH_MIN_INTERVAL_MIN", 60)),
            engagement_window_days: env_parse("WALLWATCH_ENGAGEMENT_WINDOW_DAYS", 90),
        })
    }

    /// Check that at least one upstream credential is configured.
    /// Call this before any operation that needs the upstream wall API.
    pub fn require_credentials(&self) -> Result<()> {
        if self.credentials.is_empty() {
            anyhow::bail!(
                "WALLWATCH_CREDENTIALS not set. Add it to your .env file as a \
                 comma-separated list of name:secret pairs.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// Allow the status module (in the library crate) to read db_path
// without depending on this binary-only config module.
impl wallwatch::status::HasDbPath for Config {
    fn db_path(&self) -> &str {
        &self.db_path
    }
}
