//! Shuriken-rs maintenance entry point.
//!
//! Usage: `shuriken [migrate|recompute|stats]` (default: `migrate`).

use std::sync::Arc;

use anyhow::bail;
use shuriken_common::{AppResult, Config};
use shuriken_core::RatingEngine;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Maintenance task selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Migrate,
    Recompute,
    Stats,
}

impl Command {
    fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg {
            None | Some("migrate") => Ok(Self::Migrate),
            Some("recompute") => Ok(Self::Recompute),
            Some("stats") => Ok(Self::Stats),
            Some(other) => bail!("unknown command `{other}`, expected migrate, recompute or stats"),
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shuriken=info,sea_orm=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(command: Command, engine: &RatingEngine) -> AppResult<()> {
    match command {
        Command::Migrate => {}
        Command::Recompute => {
            let recomputed = engine.aggregation.recompute_all().await?;
            info!(recomputed, "Parent ratings repaired");
        }
        Command::Stats => {
            let stats = engine.ratings.stats().await?;
            info!(
                total_ratings = stats.total_ratings,
                total_votes = stats.total_votes,
                "Store statistics"
            );
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    init_tracing(config.logging.json);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(args.first().map(String::as_str))?;

    let db = shuriken_db::init(&config.database).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    shuriken_db::migrate(&db).await?;
    info!("Migrations completed");

    let engine = RatingEngine::new(Arc::new(db), &config);

    if let Err(e) = run(command, &engine).await {
        e.log();
        return Err(e.into());
    }

    Ok(())
}
