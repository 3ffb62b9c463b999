use serde::Deserialize;
use std::time::Duration;

/// Gateway server settings.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Worker token provisioned at startup when it does not exist yet.
    #[serde(default)]
    pub bootstrap_worker_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite://verify-queue.db".to_string()
}

fn default_db_max_connections() -> u32 {
    8
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

/// Worker process settings. Every field has a default so a worker starts
/// with no configuration at all.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of the gateway
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Token sent in `X-Worker-Token`
    #[serde(default = "default_api_token")]
    pub api_token: String,

    /// Delay between claim attempts while the queue is empty
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Budget for a single probe (navigation and element waits)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Pause after submitting the address so the provider can render its response
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Maximum jobs in flight in this process
    #[serde(default = "default_concurrent_jobs")]
    pub concurrent_jobs: usize,

    /// WebDriver endpoint (chromedriver or a Selenium grid)
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Optional HTTP proxy for the browser, e.g. "proxy.local:8080"
    #[serde(default)]
    pub proxy_server: Option<String>,

    /// How often local counters are logged
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_api_endpoint() -> String {
    "http://localhost:3000".to_string()
}

fn default_api_token() -> String {
    "dev-token-change-in-production".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    15_000
}

fn default_settle_delay_ms() -> u64 {
    2_500
}

fn default_headless() -> bool {
    true
}

fn default_concurrent_jobs() -> usize {
    3
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_stats_interval_secs() -> u64 {
    30
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Self>().map(Self::normalized)
    }

    /// Clamp values that would stall the runtime.
    pub fn normalized(mut self) -> Self {
        self.concurrent_jobs = self.concurrent_jobs.max(1);
        self.poll_interval_ms = self.poll_interval_ms.max(10);
        self.api_endpoint = self.api_endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults_need_no_environment() {
        let config: WorkerConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        let config = config.normalized();

        assert_eq!(config.api_endpoint, "http://localhost:3000");
        assert_eq!(config.concurrent_jobs, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.probe_timeout(), Duration::from_secs(15));
        assert!(config.headless);
        assert!(config.proxy_server.is_none());
    }

    #[test]
    fn test_worker_overrides_and_clamping() {
        let vars = vec![
            ("API_ENDPOINT".to_string(), "http://gateway:8080/".to_string()),
            ("CONCURRENT_JOBS".to_string(), "0".to_string()),
            ("HEADLESS".to_string(), "false".to_string()),
            ("PROXY_SERVER".to_string(), "proxy.local:3128".to_string()),
        ];
        let config: WorkerConfig = envy::from_iter(vars).unwrap();
        let config = config.normalized();

        assert_eq!(config.api_endpoint, "http://gateway:8080");
        assert_eq!(config.concurrent_jobs, 1);
        assert!(!config.headless);
        assert_eq!(config.proxy_server.as_deref(), Some("proxy.local:3128"));
    }

    #[test]
    fn test_app_defaults() {
        let config: AppConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.database_url, "sqlite://verify-queue.db");
        assert!(config.bootstrap_worker_token.is_none());
    }
}
