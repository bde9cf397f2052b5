use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub pipeline: PipelineSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// `row` or `columnar`
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    pub timeout_secs: u64,
    pub max_workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file first so its values count as environment
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("engine.backend", "row")?
            .set_default("pipeline.timeout_secs", 60)?
            .set_default("pipeline.max_workers", num_cpus::get() as u64)?
            .set_default("cache.max_size", 256)?
            .set_default("cache.ttl_secs", 300)?;

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(backend) = env::var("ENGINE_BACKEND") {
            builder = builder.set_override("engine.backend", backend)?;
        }

        if let Ok(timeout) = env::var("PIPELINE_TIMEOUT_SECS") {
            builder = builder.set_override(
                "pipeline.timeout_secs",
                timeout.parse::<u64>().unwrap_or(60),
            )?;
        }

        if let Ok(workers) = env::var("PIPELINE_MAX_WORKERS") {
            let workers = workers.parse::<u64>().unwrap_or(num_cpus::get() as u64);
            builder = builder.set_override("pipeline.max_workers", workers.max(1))?;
        }

        if let Ok(size) = env::var("RESULT_CACHE_SIZE") {
            builder = builder.set_override("cache.max_size", size.parse::<u64>().unwrap_or(256))?;
        }

        if let Ok(ttl) = env::var("RESULT_CACHE_TTL_SECS") {
            builder = builder.set_override("cache.ttl_secs", ttl.parse::<u64>().unwrap_or(300))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        env::remove_var("HOST");
        env::remove_var("PORT");
        env::remove_var("ENGINE_BACKEND");
        env::remove_var("PIPELINE_TIMEOUT_SECS");
        env::remove_var("RESULT_CACHE_SIZE");

        let config = Config::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.engine.backend, "row");
        assert_eq!(config.pipeline.timeout_secs, 60);
        assert!(config.pipeline.max_workers >= 1);
        assert_eq!(config.cache.max_size, 256);
        assert_eq!(config.server_address(), "0.0.0.0:3000");
    }
}
