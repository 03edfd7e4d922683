use std::io::Read;
use std::sync::Arc;

use contact_enricher::{app_context::AppContext, config::Config, error::UnhandledError, handle_event};
use envconfig::Envconfig;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Logs go to stderr, stdout carries the response.
fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

    let log_layer = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    };
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), UnhandledError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let event: Value = serde_json::from_str(&input)?;

    let context = Arc::new(AppContext::from_aws(config).await);
    let response = handle_event(context, event).await?;

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
