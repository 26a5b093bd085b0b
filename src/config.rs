use std::time::Duration;

use subtle::ConstantTimeEq;

use crate::cache::CacheType;
use crate::inspector::{Access, Credentials, non_empty};

/// Process-wide settings, from flags with environment fallbacks.
#[derive(Clone, clap::Args)]
pub struct Settings {
    /// Default registry username when a request supplies none
    #[arg(long, env = "IMAGE_USERNAME", global = true)]
    pub username: Option<String>,

    /// Default registry password when a request supplies none
    #[arg(long, env = "IMAGE_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Default proxy for inspector calls and blob fetches
    #[arg(long, env = "HTTPS_PROXY", global = true)]
    pub proxy: Option<String>,

    /// Require this value in the `api_key` query parameter
    #[arg(long, env = "API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Cache backend
    #[arg(long, env = "CACHE_TYPE", value_enum, default_value_t = CacheType::Simple, global = true)]
    pub cache_type: CacheType,

    /// Cache TTL in seconds (0 = never expire)
    #[arg(long, env = "CACHE_TIMEOUT", default_value_t = 3600, global = true)]
    pub cache_timeout: u64,

    /// Maximum cached responses (0 = unbounded)
    #[arg(long, env = "CACHE_THRESHOLD", default_value_t = 500, global = true)]
    pub cache_threshold: usize,

    /// Inspector binary
    #[arg(long = "skopeo", env = "SKOPEO_BIN", default_value = "skopeo", global = true)]
    pub inspector: String,

    /// Seconds before an inspector call is killed
    #[arg(long, env = "INSPECT_TIMEOUT", default_value_t = 60, global = true)]
    pub inspect_timeout: u64,

    /// Seconds before a registry blob fetch is abandoned
    #[arg(long, env = "FETCH_TIMEOUT", default_value_t = 30, global = true)]
    pub fetch_timeout: u64,
}

/// Built once at startup and shared by reference; nothing reads the
/// environment after this.
#[derive(Clone)]
pub struct Config {
    pub default_username: Option<String>,
    pub default_password: Option<String>,
    pub default_proxy: Option<String>,
    pub api_key: Option<String>,
    pub cache_type: CacheType,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub inspector_cmd: String,
    pub inspect_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_username: None,
            default_password: None,
            default_proxy: None,
            api_key: None,
            cache_type: CacheType::Simple,
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 500,
            inspector_cmd: "skopeo".into(),
            inspect_timeout: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl From<Settings> for Config {
    fn from(s: Settings) -> Self {
        let owned = |v: Option<String>| non_empty(v.as_deref()).map(str::to_string);
        Self {
            default_username: owned(s.username),
            default_password: owned(s.password),
            default_proxy: owned(s.proxy),
            api_key: owned(s.api_key),
            cache_type: s.cache_type,
            cache_ttl: Duration::from_secs(s.cache_timeout),
            cache_max_entries: s.cache_threshold,
            inspector_cmd: s.inspector,
            inspect_timeout: Duration::from_secs(s.inspect_timeout),
            fetch_timeout: Duration::from_secs(s.fetch_timeout),
        }
    }
}

impl Config {
    /// Request values win; configured defaults fill the gaps field by field.
    pub fn access(
        &self,
        username: Option<&str>,
        password: Option<&str>,
        proxy: Option<&str>,
    ) -> Access {
        let username = non_empty(username).or(self.default_username.as_deref());
        let password = non_empty(password).or(self.default_password.as_deref());
        let proxy = non_empty(proxy).or(self.default_proxy.as_deref());
        Access {
            credentials: Credentials::from_parts(username, password),
            proxy: proxy.map(str::to_string),
        }
    }

    /// No configured key disables gating entirely.
    pub fn api_key_matches(&self, supplied: Option<&str>) -> bool {
        match &self.api_key {
            None => true,
            Some(expected) => supplied
                .is_some_and(|s| bool::from(s.as_bytes().ct_eq(expected.as_bytes()))),
        }
    }
}
