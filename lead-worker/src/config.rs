use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub netcore: NetcoreConfig,

    #[envconfig(default = "20000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "zoho-netcore-prod-raw-data")]
    pub raw_bucket: String,

    #[envconfig(default = "zoho-netcore-prod-transformed-data")]
    pub processed_bucket: String,

    #[envconfig(default = "ap-south-1")]
    pub object_storage_region: String,

    pub object_storage_endpoint: Option<String>,

    #[envconfig(default = "10485760")]
    pub max_body_size: usize,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            base_url: non_empty(&self.netcore.base_url),
            api_key: non_empty(&self.netcore.api_key),
            list_id: non_empty(&self.netcore.list_id),
            request_timeout: self.request_timeout.0,
        }
    }
}

/// Downstream API settings. All optional at startup: a missing base URL or API key only fails
/// the send step of each message.
#[derive(Envconfig, Clone)]
pub struct NetcoreConfig {
    #[envconfig(from = "NETCORE_BASE_URL")]
    pub base_url: Option<String>,

    #[envconfig(from = "NETCORE_API_KEY")]
    pub api_key: Option<String>,

    #[envconfig(from = "NETCORE_LIST_ID")]
    pub list_id: Option<String>,
}

/// What the delivery client needs, with blank values already treated as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub list_id: Option<String>,
    pub request_timeout: time::Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            list_id: None,
            request_timeout: time::Duration::from_millis(20_000),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
