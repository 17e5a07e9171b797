use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cohort_core::{load_config, EnvOverrides, HeaderValidator, TypeActivity};
use cohort_engine::{DispatcherBuilder, MemoryReferenceStore};

mod replay;

#[derive(Parser)]
#[command(name = "cohort-replay")]
#[command(about = "Replay recorded instance events through the reference copy engine")]
#[command(version)]
struct Cli {
    /// Cohort member config (TOML)
    #[arg(short, long, default_value = "cohort.toml")]
    config: PathBuf,

    /// JSON-lines file of {"source": ..., "message": {...}} records
    events: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    info!("Cohort replay starting...");

    // Load config, then let the environment override identity
    let mut config = load_config(&cli.config)?;
    EnvOverrides::from_env()?.apply(&mut config);
    config.validate()?;
    config.log_redacted();

    // Wire the engine over an in-memory store
    let types: Arc<dyn TypeActivity> = Arc::new(config.type_registry());
    let rule = Arc::new(config.exchange_rule(types));
    let store = Arc::new(MemoryReferenceStore::new());
    let dispatcher = DispatcherBuilder::from_config(&config)
        .store(store.clone())
        .validator(Arc::new(HeaderValidator))
        .exchange_rule(rule.clone())
        .build()?;

    let input = replay::read_events(&cli.events)?;
    if input.is_empty() {
        warn!(path = %cli.events.display(), "No events to replay");
    }
    let summary = replay::replay(&dispatcher, input).await?;

    info!(
        entities = store.entity_count(),
        relationships = store.relationship_count(),
        learned_types = rule.learned_types().len(),
        "Reference copies held"
    );
    info!("Replay complete. {summary}");
    Ok(())
}

/// Human-readable logs by default; `LOG_FORMAT=json` for log shippers.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("cohort=info".parse()?);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
