use anyhow::Context;
use chitfund::notify::TracingSink;
use chitfund::orchestration::{run_maintenance, Orchestrator};
use chitfund::{config::Config, db::init_db, SqliteRepository};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let pool = match init_db(&config.database_path, config.db_max_connections).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let repo = Arc::new(SqliteRepository::new(pool));
    let orchestrator = Orchestrator::new(repo, Arc::new(TracingSink::new()));

    let now = config.maintenance_as_of.unwrap_or_else(chrono::Utc::now);
    tracing::info!(task = %config.maintenance_task, as_of = %now, "Starting maintenance run");

    let report = run_maintenance(&orchestrator, config.maintenance_task, now)
        .await
        .with_context(|| format!("maintenance task {} failed", config.maintenance_task))?;

    tracing::info!(
        groups = report.groups,
        newly_overdue = report.newly_overdue,
        rankings_rebuilt = report.rankings_rebuilt,
        "Maintenance run complete"
    );
    Ok(())
}
