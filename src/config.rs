//! Runtime configuration.
//!
//! Every section has defaults, so an empty TOML file (or none at all) is a
//! valid configuration. Environment variables override file values.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Forecast window sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    /// Number of most recent observations fed to the model
    pub lookback: usize,

    /// Number of future steps to predict
    pub horizon: usize,

    /// Largest horizon a single request may ask for
    pub max_horizon: usize,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            lookback: 60,
            horizon: 30,
            max_horizon: 365,
        }
    }
}

/// Where the one-step model lives and how to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Local ONNX model file; also the download target when `url` is set
    pub path: PathBuf,

    /// Remote location of the model, fetched once into `path`
    pub url: Option<String>,

    /// Enable graph optimization
    pub optimize_graph: bool,

    /// Intra-op threads for the inference session
    pub intra_threads: usize,

    /// Download timeout in seconds
    pub download_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/stoc.onnx"),
            url: None,
            optimize_graph: true,
            intra_threads: 1, // Single-threaded for determinism
            download_timeout_secs: 120,
        }
    }
}

/// Price history source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Chart endpoint, without the ticker path segment
    pub base_url: String,

    /// Lookback range requested from the endpoint (e.g. `2y`, `10y`, `max`)
    pub range: String,

    /// Bar interval (e.g. `1d`)
    pub interval: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,

    /// Directory for `{TICKER}_data.csv` fallback caches; disabled when unset
    pub cache_dir: Option<PathBuf>,

    /// Total attempts per fetch, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each subsequent retry
    pub initial_backoff_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com/v8/finance/chart".to_string(),
            range: "2y".to_string(),
            interval: "1d".to_string(),
            timeout_secs: 10,
            cache_dir: Some(PathBuf::from("cache")),
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub forecast: ForecastSettings,
    pub model: ModelConfig,
    pub history: HistoryConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_toml(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise defaults, then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    ///
    /// Recognised keys: `STOCKIE_LOOKBACK`, `STOCKIE_HORIZON`, `STOCKIE_MAX_HORIZON`,
    /// `STOCKIE_MODEL_PATH`, `STOCKIE_MODEL_URL`, `STOCKIE_CACHE_DIR`, `HOST`, `PORT`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STOCKIE_LOOKBACK") {
            self.forecast.lookback = v
                .parse()
                .map_err(|e| anyhow::anyhow!("STOCKIE_LOOKBACK={v}: {e}"))?;
        }
        if let Some(v) = lookup("STOCKIE_HORIZON") {
            self.forecast.horizon = v
                .parse()
                .map_err(|e| anyhow::anyhow!("STOCKIE_HORIZON={v}: {e}"))?;
        }
        if let Some(v) = lookup("STOCKIE_MAX_HORIZON") {
            self.forecast.max_horizon = v
                .parse()
                .map_err(|e| anyhow::anyhow!("STOCKIE_MAX_HORIZON={v}: {e}"))?;
        }
        if let Some(v) = lookup("STOCKIE_MODEL_PATH") {
            self.model.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("STOCKIE_MODEL_URL") {
            self.model.url = Some(v);
        }
        if let Some(v) = lookup("STOCKIE_CACHE_DIR") {
            self.history.cache_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v.parse().map_err(|e| anyhow::anyhow!("PORT={v}: {e}"))?;
        }
        Ok(())
    }

    /// Reject settings the forecaster cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.forecast.lookback == 0 {
            anyhow::bail!("forecast.lookback must be at least 1");
        }
        if self.forecast.horizon == 0 {
            anyhow::bail!("forecast.horizon must be at least 1");
        }
        if self.forecast.horizon > self.forecast.max_horizon {
            anyhow::bail!(
                "forecast.horizon ({}) exceeds forecast.max_horizon ({})",
                self.forecast.horizon,
                self.forecast.max_horizon
            );
        }
        if self.history.max_attempts == 0 {
            anyhow::bail!("history.max_attempts must be at least 1");
        }
        if self.model.intra_threads == 0 {
            anyhow::bail!("model.intra_threads must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.forecast.lookback, 60);
        assert_eq!(config.forecast.horizon, 30);
        assert_eq!(config.forecast.max_horizon, 365);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.history.range, "2y");
        assert_eq!(config.history.max_attempts, 3);
        assert!(config.model.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[forecast]\nlookback = 30\n\n[model]\nurl = \"https://models.example.com/stoc.onnx\"\n"
        )
        .unwrap();

        let config = Config::from_toml(file.path()).unwrap();

        assert_eq!(config.forecast.lookback, 30);
        assert_eq!(config.forecast.horizon, 30);
        assert_eq!(
            config.model.url.as_deref(),
            Some("https://models.example.com/stoc.onnx")
        );
        assert_eq!(config.model.path, PathBuf::from("models/stoc.onnx"));
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/stockie.toml");
        let config = Config::from_toml(&path).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.cache_dir, Some(PathBuf::from("cache")));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("STOCKIE_LOOKBACK", "45"),
            ("STOCKIE_HORIZON", "5"),
            ("STOCKIE_MODEL_PATH", "/tmp/stoc.onnx"),
            ("PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.forecast.lookback, 45);
        assert_eq!(config.forecast.horizon, 5);
        assert_eq!(config.model.path, PathBuf::from("/tmp/stoc.onnx"));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "PORT").then(|| "ninety".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_windows() {
        let mut config = Config::default();
        config.forecast.lookback = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.forecast.horizon = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_horizon_above_cap() {
        let mut config = Config::default();
        config.forecast.horizon = 400;
        assert!(config.validate().is_err());

        config
            .apply_overrides(|k| (k == "STOCKIE_MAX_HORIZON").then(|| "500".to_string()))
            .unwrap();
        assert_eq!(config.forecast.max_horizon, 500);
        assert!(config.validate().is_ok());
    }
}
