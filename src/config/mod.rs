// Configuration management module
// TOML settings, the config directory and a printable summary

pub mod settings;


use anyhow::{Context, Result};
use console::style;
use std::path::PathBuf;

pub use crate::extract::browser::BrowserConfig;
pub use settings::{
    Config, ConfigError, DEFAULT_COLLECTION, EmbeddingConfig, EmbeddingProviderKind,
    GenerationConfig, RetrievalConfig, ServerConfig, StoreBackend, StoreConfig,
};

/// Environment variable that overrides the configuration directory
pub const CONFIG_DIR_ENV: &str = "GRANTHX_CONFIG_DIR";

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    dirs::config_dir()
        .map(|dir| dir.join("granthx"))
        .or_else(|| dirs::home_dir().map(|home| home.join(".granthx")))
        .ok_or(ConfigError::DirectoryError)
}

/// Load the configuration from the default directory
#[inline]
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir().context("Failed to determine config directory")?;
    Config::load(config_dir)
}

#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding Settings:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    eprintln!("  Model: {}", style(&config.embedding.model).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());
    match config.embedding.endpoint_url() {
        Ok(url) => eprintln!("  Endpoint: {}", style(url).cyan()),
        Err(e) => eprintln!("  Endpoint: {} ({})", style("Invalid").red(), e),
    }
    print_api_key_status(&config.embedding.api_key_env);

    eprintln!();
    eprintln!("{}", style("Generation Settings:").bold().yellow());
    eprintln!("  Endpoint: {}", style(&config.generation.base_url).cyan());
    eprintln!("  Model: {}", style(&config.generation.model).cyan());
    eprintln!(
        "  Temperature: {}  Top P: {}  Max Tokens: {}",
        style(config.generation.temperature).cyan(),
        style(config.generation.top_p).cyan(),
        style(config.generation.max_completion_tokens).cyan()
    );
    print_api_key_status(&config.generation.api_key_env);

    eprintln!();
    eprintln!("{}", style("Storage & Retrieval:").bold().yellow());
    eprintln!("  Backend: {}", style(config.store.backend).cyan());
    eprintln!("  Collection: {}", style(&config.store.collection).cyan());
    eprintln!(
        "  Vector Database: {}",
        style(config.vector_database_path().display()).cyan()
    );
    eprintln!(
        "  Chunk Size: {} (overlap {})",
        style(config.chunking.max_chunk_size).cyan(),
        style(config.chunking.chunk_overlap).cyan()
    );
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());

    eprintln!();
    eprintln!("{}", style("Server:").bold().yellow());
    eprintln!(
        "  Listen: {}",
        style(format!("{}:{}", config.server.host, config.server.port)).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

fn print_api_key_status(variable: &str) {
    if std::env::var_os(variable).is_some() {
        eprintln!("  API Key: {} ({})", style("set").green(), variable);
    } else {
        eprintln!("  API Key: {} ({})", style("not set").dim(), variable);
    }
}
