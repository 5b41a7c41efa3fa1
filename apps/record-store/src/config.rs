use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Upper bound on `limit` for window reads.
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
    #[serde(default)]
    pub log_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            max_limit: default_max_limit(),
            log_path: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_else(|_| AppConfig::default().normalize())
    }

    fn normalize(mut self) -> Self {
        self.log_path = Self::normalize_opt(self.log_path.take());
        let data_dir = self.data_dir.trim();
        self.data_dir = if data_dir.is_empty() {
            default_data_dir()
        } else {
            data_dir.to_string()
        };
        self.max_limit = self.max_limit.max(1);
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_max_limit() -> u64 {
    1_000
}
