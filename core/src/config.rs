use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

/// Settings for the engine's single on-disk store file (§6, on-disk format).
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub database_path: String,
    pub wal_flush_interval_ms: u64,
}

/// Settings for the embedding arm of retrieval (§4.9).
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub dims: usize,
    pub default_model_id: String,
}

/// Settings governing the optional AI synthesis tier (§4.8); the Gemini key
/// is absent by default and only fatal when an AI-tier operation is
/// actually requested (§6).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AiConfig {
    pub gemini_api_key: Option<String>,
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageConfig {
    pub output_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ai: AiConfig,
    pub image: ImageConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Layers `config/default.{toml,yaml,...}`, an optional
    /// `config/{RUN_MODE}` override, then `DOCGRAPH_*` / the spec's raw
    /// environment variables (`DATABASE_PATH`, `GEMINI_API_KEY`,
    /// `IMAGE_OUTPUT_DIR`, `LOG_LEVEL`) on top.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("DOCGRAPH").separator("__"));

        if let Ok(path) = env::var("DATABASE_PATH") {
            builder = builder.set_override("storage.database_path", path)?;
        }
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            builder = builder.set_override("ai.gemini_api_key", key)?;
        }
        if let Ok(dir) = env::var("IMAGE_OUTPUT_DIR") {
            builder = builder.set_override("image.output_dir", dir)?;
        }
        if let Ok(level) = env::var("LOG_LEVEL") {
            builder = builder.set_override("log_level", level)?;
        }

        builder.build()?.try_deserialize()
    }
}
