use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tallerflow::catalog::{parse_catalog_file, CatalogHandle};
use tallerflow::config::Config;
use tallerflow::engine::{bootstrap_catalog, OrderStatus, TransitionOptions, WorkflowEngine};
use tallerflow::notify::TracingNotifier;
use tallerflow::storage::SqliteStorage;

#[derive(Parser)]
#[command(name = "tallerflow")]
#[command(about = "Work-order lifecycle and SLA engine for repair shops", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (API + SLA sweep)
    Server {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
        /// Do not run the periodic SLA sweep
        #[arg(long)]
        no_sweep: bool,
    },
    /// Work-order workflow operations
    Orders {
        #[command(subcommand)]
        action: OrderActions,
    },
    /// Stage catalog management
    Catalog {
        #[command(subcommand)]
        action: CatalogActions,
    },
    /// Wait-cause registry management
    Causes {
        #[command(subcommand)]
        action: CauseActions,
    },
    /// Run one SLA sweep and report alerts
    Sweep,
    /// Database maintenance and checks
    Db {
        #[command(subcommand)]
        action: DbActions,
    },
}

#[derive(Subcommand)]
enum OrderActions {
    /// Open workflow tracking for a work order
    Open { order_id: String },
    /// Show stage, timer and SLA status
    Status { order_id: String },
    /// Move a work order to another stage
    Transition {
        order_id: String,
        to_stage: String,
        /// Fail if the order is not currently in this stage
        #[arg(long)]
        expected_stage: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Pause the timer for a wait cause
    Pause { order_id: String, wait_cause: String },
    /// Resume a paused timer
    Resume { order_id: String },
    /// Show stage history
    History { order_id: String },
    /// Show recorded pauses
    Pauses { order_id: String },
    /// List open orders with their SLA status
    List,
}

#[derive(Subcommand)]
enum CatalogActions {
    /// Show the active stage catalog
    Show,
    /// Validate a catalog YAML file without importing it
    Validate { file: PathBuf },
    /// Import a catalog YAML file
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum CauseActions {
    /// List wait causes
    List,
    /// Stop offering a wait cause for new pauses
    Deactivate { id: String },
    /// Remove a wait cause (deactivated instead if pauses reference it)
    Remove { id: String },
}

#[derive(Subcommand)]
enum DbActions {
    /// Run database health checks
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tallerflow=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            host,
            no_sweep,
        } => cmd_server(port, host, no_sweep).await?,
        Commands::Orders { action } => match action {
            OrderActions::Open { order_id } => cmd_orders_open(&order_id).await?,
            OrderActions::Status { order_id } => cmd_orders_status(&order_id).await?,
            OrderActions::Transition {
                order_id,
                to_stage,
                expected_stage,
                note,
                actor,
            } => {
                let options = TransitionOptions {
                    expected_stage,
                    note,
                    actor,
                };
                cmd_orders_transition(&order_id, &to_stage, options).await?
            }
            OrderActions::Pause {
                order_id,
                wait_cause,
            } => cmd_orders_pause(&order_id, &wait_cause).await?,
            OrderActions::Resume { order_id } => cmd_orders_resume(&order_id).await?,
            OrderActions::History { order_id } => cmd_orders_history(&order_id).await?,
            OrderActions::Pauses { order_id } => cmd_orders_pauses(&order_id).await?,
            OrderActions::List => cmd_orders_list().await?,
        },
        Commands::Catalog { action } => match action {
            CatalogActions::Show => cmd_catalog_show().await?,
            CatalogActions::Validate { file } => cmd_catalog_validate(&file)?,
            CatalogActions::Import { file } => cmd_catalog_import(&file).await?,
        },
        Commands::Causes { action } => match action {
            CauseActions::List => cmd_causes_list().await?,
            CauseActions::Deactivate { id } => cmd_causes_deactivate(&id).await?,
            CauseActions::Remove { id } => cmd_causes_remove(&id).await?,
        },
        Commands::Sweep => cmd_sweep().await?,
        Commands::Db { action } => match action {
            DbActions::Check => cmd_db_check().await?,
        },
    }

    Ok(())
}

// ============================================================================
// Server
// ============================================================================

async fn cmd_server(port: Option<u16>, host: Option<String>, no_sweep: bool) -> anyhow::Result<()> {
    use tallerflow::api::{create_router, AppState};
    use tallerflow::sweep::SlaSweeper;

    let config = Config::load();
    let port = port.unwrap_or(config.server.port);
    let host = host.unwrap_or_else(|| config.server.host.clone());

    tallerflow::metrics::init_metrics();

    let engine = build_engine(&config).await?;
    tallerflow::metrics::set_active_orders(engine.storage().count_open_orders().await?);

    let sweep_enabled = config.sla.sweep_enabled && !no_sweep;
    let mut sweeper = SlaSweeper::new(engine.clone())
        .with_interval(Duration::from_secs(config.sla.sweep_interval_seconds));
    if sweep_enabled {
        sweeper.start()?;
    }

    let app = create_router(AppState {
        engine: engine.clone(),
    });

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!("tallerflow server running on http://{}", addr);
    println!();
    println!(
        "Catalog: version {} ({} stages)",
        engine.catalog().snapshot().version(),
        engine.catalog().snapshot().list_stages().len()
    );
    if sweep_enabled {
        println!(
            "SLA sweep: every {}s",
            config.sla.sweep_interval_seconds
        );
    } else {
        println!("SLA sweep: disabled");
    }
    println!();
    println!("API endpoints:");
    println!("  GET  /api/health");
    println!("  GET  /api/stages");
    println!("  GET  /api/wait-causes");
    println!("  POST /api/orders");
    println!("  GET  /api/orders/{{id}}/status");
    println!("  POST /api/orders/{{id}}/transition");
    println!("  POST /api/orders/{{id}}/pause");
    println!("  POST /api/orders/{{id}}/resume");
    println!("  GET  /api/dashboard");
    println!("  GET  /metrics");
    println!();
    println!("Press Ctrl+C to stop");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await?;

    println!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    println!("\nShutting down gracefully...");
}

// ============================================================================
// Order Commands
// ============================================================================

async fn cmd_orders_open(order_id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let status = engine.open_order(order_id).await?;
    println!("✓ Opened work order '{}' at {}", status.order_id, status.stage);
    Ok(())
}

async fn cmd_orders_status(order_id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let status = engine.status(order_id).await?;
    print_status(&status);
    Ok(())
}

async fn cmd_orders_transition(
    order_id: &str,
    to_stage: &str,
    options: TransitionOptions,
) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let outcome = engine.transition(order_id, to_stage, options).await?;
    println!(
        "✓ {} → {} (left {} after {}, {})",
        outcome.from_stage,
        outcome.status.stage,
        outcome.from_stage,
        format_duration(outcome.closed_active_seconds),
        outcome.closed_sla_status
    );
    if outcome.status.closed {
        println!("Work order closed.");
    }
    Ok(())
}

async fn cmd_orders_pause(order_id: &str, wait_cause: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let status = engine.pause(order_id, wait_cause).await?;
    println!(
        "✓ Timer paused in {} ({} active)",
        status.stage,
        format_duration(status.sla.active_seconds)
    );
    Ok(())
}

async fn cmd_orders_resume(order_id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let status = engine.resume(order_id).await?;
    println!("✓ Timer resumed in {}", status.stage);
    Ok(())
}

async fn cmd_orders_history(order_id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let history = engine.history(order_id).await?;

    println!(
        "{:<24} {:<18} {:<18} {:<10} {:<10}",
        "STAGE", "ENTERED", "EXITED", "ACTIVE", "SLA"
    );
    println!("{}", "-".repeat(82));
    for entry in history {
        println!(
            "{:<24} {:<18} {:<18} {:<10} {:<10}",
            entry.record.stage_id,
            entry.record.entered_at.format("%Y-%m-%d %H:%M"),
            entry
                .record
                .exited_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            format_duration(entry.elapsed_seconds),
            entry.sla_status
        );
    }
    Ok(())
}

async fn cmd_orders_pauses(order_id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let pauses = engine.pauses(order_id).await?;

    if pauses.is_empty() {
        println!("No pauses recorded.");
        return Ok(());
    }

    println!(
        "{:<24} {:<24} {:<18} {:<10}",
        "STAGE", "WAIT CAUSE", "PAUSED AT", "DURATION"
    );
    println!("{}", "-".repeat(78));
    for pause in pauses {
        println!(
            "{:<24} {:<24} {:<18} {:<10}",
            pause.record.stage_id,
            pause
                .wait_cause_name
                .unwrap_or_else(|| pause.record.wait_cause_id.clone()),
            pause.record.paused_at.format("%Y-%m-%d %H:%M"),
            format_duration(pause.paused_seconds)
        );
    }
    Ok(())
}

async fn cmd_orders_list() -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let dashboard = engine.dashboard().await?;

    if dashboard.orders.is_empty() {
        println!("No open work orders.");
        return Ok(());
    }

    println!(
        "{:<20} {:<24} {:<10} {:<10} {:<10}",
        "ORDER", "STAGE", "TIMER", "ACTIVE", "SLA"
    );
    println!("{}", "-".repeat(78));
    for status in &dashboard.orders {
        println!(
            "{:<20} {:<24} {:<10} {:<10} {:<10}",
            status.order_id,
            status.stage,
            status.timer.status,
            format_duration(status.sla.active_seconds),
            status.sla_status
        );
    }
    println!();
    for (status, count) in &dashboard.by_sla_status {
        println!("{:<10} {}", status, count);
    }
    Ok(())
}

// ============================================================================
// Catalog Commands
// ============================================================================

async fn cmd_catalog_show() -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let catalog = engine.catalog().snapshot();

    println!(
        "{:<4} {:<24} {:>6} {:>8} {:>9} {:<7} {}",
        "#", "STAGE", "SLA h", "WARN h", "CRIT h", "ACTIVE", "NEXT"
    );
    println!("{}", "-".repeat(100));
    for stage in catalog.list_stages() {
        println!(
            "{:<4} {:<24} {:>6} {:>8} {:>9} {:<7} {}",
            stage.order,
            stage.id,
            stage.sla_hours,
            stage.warning_threshold_hours,
            stage.critical_threshold_hours,
            if stage.is_active { "yes" } else { "no" },
            stage.allowed_transitions.join(", ")
        );
    }
    Ok(())
}

fn cmd_catalog_validate(file: &std::path::Path) -> anyhow::Result<()> {
    let document = parse_catalog_file(file)?;
    println!(
        "✓ Catalog is valid ({} stages, {} wait causes)",
        document.stages.len(),
        document.wait_causes.len()
    );
    Ok(())
}

async fn cmd_catalog_import(file: &std::path::Path) -> anyhow::Result<()> {
    let document = parse_catalog_file(file)?;
    let engine = get_engine().await?;
    let catalog = engine.import_catalog(document).await?;
    println!(
        "✓ Imported catalog: {} stages, {} wait causes",
        catalog.list_stages().len(),
        catalog.list_wait_causes().len()
    );
    Ok(())
}

// ============================================================================
// Wait-Cause Commands
// ============================================================================

async fn cmd_causes_list() -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let catalog = engine.catalog().snapshot();

    println!("{:<24} {:<28} {:<8}", "ID", "NAME", "ACTIVE");
    println!("{}", "-".repeat(62));
    for cause in catalog.list_wait_causes() {
        println!(
            "{:<24} {:<28} {:<8}",
            cause.id,
            cause.name,
            if cause.is_active { "yes" } else { "no" }
        );
    }
    Ok(())
}

async fn cmd_causes_deactivate(id: &str) -> anyhow::Result<()> {
    let engine = get_engine().await?;
    engine.deactivate_wait_cause(id).await?;
    println!("✓ Wait cause '{}' deactivated", id);
    Ok(())
}

async fn cmd_causes_remove(id: &str) -> anyhow::Result<()> {
    use tallerflow::storage::WaitCauseRemoval;

    let engine = get_engine().await?;
    match engine.remove_wait_cause(id).await? {
        WaitCauseRemoval::Deactivated => println!(
            "✓ Wait cause '{}' is referenced by recorded pauses; deactivated instead",
            id
        ),
        _ => println!("✓ Wait cause '{}' removed", id),
    }
    Ok(())
}

// ============================================================================
// Sweep & Database Commands
// ============================================================================

async fn cmd_sweep() -> anyhow::Result<()> {
    let engine = get_engine().await?;
    let report = tallerflow::sweep::sweep_once(&engine).await?;
    println!(
        "Scanned {} open order(s): {} alert(s), {} failure(s)",
        report.scanned, report.alerts, report.failures
    );
    Ok(())
}

async fn cmd_db_check() -> anyhow::Result<()> {
    let storage = get_storage(&Config::load())?;
    let health = storage.check_health().await?;

    println!(
        "Foreign keys: {}",
        if health.foreign_keys_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("Integrity check: {}", health.integrity_check);
    println!("Journal mode: {}", health.journal_mode);
    println!(
        "Open orders without an open stage: {}",
        health.orders_without_open_stage
    );
    println!("Open pauses on running timers: {}", health.dangling_pauses);

    if health.is_healthy() {
        println!("✓ Database health check passed");
        Ok(())
    } else {
        anyhow::bail!("Database health check failed")
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn get_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SqliteStorage::open(&db_path)?)
}

/// Engine with the configured catalog; events go to the log.
async fn build_engine(config: &Config) -> anyhow::Result<WorkflowEngine> {
    let storage = get_storage(config)?;
    let catalog = bootstrap_catalog(&storage, config.catalog.path.as_deref()).await?;
    Ok(WorkflowEngine::new(storage, CatalogHandle::new(catalog))
        .with_notifier(Arc::new(TracingNotifier)))
}

async fn get_engine() -> anyhow::Result<WorkflowEngine> {
    build_engine(&Config::load()).await
}

fn print_status(status: &OrderStatus) {
    println!("Order:    {}", status.order_id);
    println!("Stage:    {} ({})", status.stage_name, status.stage);
    println!("Timer:    {}", status.timer.status);
    if status.timer.is_paused() {
        println!(
            "Waiting:  {}",
            status.timer.pause_reason.as_deref().unwrap_or("-")
        );
    }
    println!("Active:   {}", format_duration(status.sla.active_seconds));
    match (status.sla.sla_seconds, status.sla.remaining_seconds) {
        (Some(sla), Some(remaining)) => println!(
            "SLA:      {} ({} of {}, {} left)",
            status.sla_status,
            format_duration(status.sla.active_seconds),
            format_duration(sla),
            if remaining >= 0 {
                format_duration(remaining as u64)
            } else {
                format!("-{}", format_duration(remaining.unsigned_abs()))
            }
        ),
        _ => println!("SLA:      {} (no SLA for this stage)", status.sla_status),
    }
    if let Some(closed_at) = status.closed_at {
        println!("Closed:   {}", closed_at.format("%Y-%m-%d %H:%M"));
    }
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{}h{:02}m", hours, minutes)
    } else {
        format!("{}m{:02}s", minutes, seconds % 60)
    }
}
