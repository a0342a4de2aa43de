use ledger_api::{
    config::AppConfig, observability::init_tracing, run, summary::InMemoryLedger,
};
use std::env;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/ledger.yaml".to_string());

    // Load configuration
    let config = match AppConfig::load_or_default(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            eprintln!("Usage: ledger-api [config_file]");
            process::exit(1);
        }
    };

    init_tracing(&config.logging);

    if let Err(e) = run(config, Arc::new(InMemoryLedger::new())).await {
        eprintln!("Server error: {}", e);
        process::exit(1);
    }
}
