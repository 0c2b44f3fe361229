//! Embedding API Main
//!
//! Loads the model once, then serves the HTTP API until Ctrl+C.

use std::sync::Arc;
use tracing::{error, info};

use embedding_api::{start_hyper_http_server, EmbeddingService, ServerConfig};

const CONFIG_ENV: &str = "EMBEDDING_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = ServerConfig::load_or_default(&config_path)?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .init();

    println!("🚀 Embedding API");
    println!("📄 Config: {}", config_path);
    println!("🧠 Model: {}", config.embedding.model);
    println!("📊 Log Level: {}", config.monitoring.log_level);
    println!("===============================");

    // Startup failures are fatal
    let service = match EmbeddingService::load(config.embedding.clone()).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("❌ Failed to initialize embedding service: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "✅ Model ready: {} on {} (dimension {})",
        service.model_name(),
        service.device().map(|d| d.to_string()).unwrap_or_default(),
        service.embedding_dimension()?
    );
    println!("🛑 Press Ctrl+C to stop");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("🛑 Shutdown signal received");
    };

    let served = start_hyper_http_server(Arc::new(config), service.clone(), shutdown).await;
    service.shutdown().await?;
    served
}
