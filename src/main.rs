// BudgetGuard - Main Entry Point
//
// Command-line front end for the quota manager and event bus:
// - simulate admission traffic against the configured limits
// - inspect configured limits
// - print the effective configuration

use anyhow::Result;
use budgetguard::config::Config;
use budgetguard::events::{handler_fn, EventBus, ListenerChannel};
use budgetguard::logging::LogLevel;
use budgetguard::quota::QuotaManager;
use budgetguard::types::{BudgetEvent, EventType, RequestContext, RequestType};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// BudgetGuard: usage governance for metered operations
#[derive(Parser, Debug)]
#[command(name = "budgetguard")]
#[command(author = "BudgetGuard Contributors")]
#[command(version)]
#[command(about = "Quota admission control, throttling and budget events", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive check-then-record traffic through the quota manager
    Simulate {
        /// Number of requests to submit
        #[arg(long, default_value_t = 20)]
        requests: usize,

        /// Request type (api_call, token_usage, cost or a custom name)
        #[arg(long, default_value = "api_call")]
        request_type: String,

        /// Value recorded per allowed request
        #[arg(long, default_value_t = 1.0)]
        value: f64,

        /// User the requests are attributed to
        #[arg(long)]
        user: Option<String>,

        /// Print Prometheus metrics afterwards
        #[arg(long)]
        metrics: bool,
    },
    /// Print the configured quota limits
    Limits,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    let mut logging = config.logging.clone();
    if args.verbose {
        logging.level = LogLevel::Debug;
    }
    logging.init()?;

    match args.command {
        Some(Commands::Simulate {
            requests,
            request_type,
            value,
            user,
            metrics,
        }) => {
            let request_type = request_type.parse::<RequestType>().unwrap_or_else(|never| match never {});
            simulate(config, requests, request_type, value, user, metrics).await?;
        }
        Some(Commands::Limits) => print_limits(&config),
        Some(Commands::Config) => print!("{}", config.to_toml()?),
        None => {
            info!("No command specified. Use \"budgetguard --help\" for usage.");
        }
    }

    Ok(())
}

async fn simulate(
    config: Config,
    requests: usize,
    request_type: RequestType,
    value: f64,
    user: Option<String>,
    with_metrics: bool,
) -> Result<()> {
    budgetguard::metrics::init()?;

    let bus = EventBus::new(config.events.clone())?;
    let manager = QuotaManager::new(config.quota.clone())?.with_event_bus(bus.clone());

    bus.on(
        ListenerChannel::Type(EventType::LimitExceeded),
        handler_fn(|event: BudgetEvent| async move {
            warn!(
                limit_id = %event.data["limit_id"].as_str().unwrap_or("unknown"),
                severity = %event.severity,
                "Limit exceeded"
            );
            Ok::<(), anyhow::Error>(())
        }),
    )
    .await;

    let context = RequestContext {
        user_id: user,
        operation: Some("simulate".to_string()),
        ..RequestContext::default()
    };

    info!(requests, request_type = %request_type, value, "Starting simulation");

    let mut tally: BTreeMap<&'static str, usize> = BTreeMap::new();
    for _ in 0..requests {
        let result = manager.check_request_allowed(&request_type, value, &context).await;
        if result.allowed() {
            manager.record_usage(&request_type, value, &context).await;
        }
        *tally.entry(result.decision_label()).or_insert(0) += 1;
    }

    println!("\n==========================================");
    println!("Simulation Summary");
    println!("==========================================");
    println!("Requests: {} x {} ({})", requests, value, request_type);
    for (decision, count) in &tally {
        println!("  {:<15} {}", decision, count);
    }

    println!("\nUsage:");
    let mut usage: Vec<_> = manager.get_quota_usage().await.into_values().collect();
    usage.sort_by(|a, b| a.limit_id.cmp(&b.limit_id));
    for entry in usage {
        println!(
            "  {:<20} {:>10.2} / {:<10.2} ({:.1}%)",
            entry.limit_id, entry.current_usage, entry.max_value, entry.usage_percentage
        );
    }

    println!("Violations: {}", manager.get_violations().await.len());

    let stats = bus.get_statistics().await;
    println!("\nEvents:");
    println!("  total           {}", stats.total_events);
    let mut by_type: Vec<_> = stats.events_by_type.iter().collect();
    by_type.sort();
    for (event_type, count) in by_type {
        println!("  {:<15} {}", event_type, count);
    }
    println!("  dropped         {}", stats.dropped_events);
    println!("==========================================\n");

    if with_metrics {
        println!("{}", budgetguard::metrics::gather_metrics()?);
    }

    manager.shutdown().await;
    bus.shutdown().await;
    Ok(())
}

fn print_limits(config: &Config) {
    if config.quota.default_limits.is_empty() {
        println!("No quota limits configured");
        return;
    }
    println!(
        "{:<20} {:<9} {:>12} {:>12} {:<8} {:<9} {}",
        "ID", "TYPE", "MAX", "WINDOW_MS", "RESET", "ACTION", "ENABLED"
    );
    for limit in &config.quota.default_limits {
        println!(
            "{:<20} {:<9} {:>12.2} {:>12} {:<8} {:<9} {}",
            limit.id,
            limit.limit_type.to_string(),
            limit.max_value,
            limit.window_ms,
            limit.reset_behavior.to_string(),
            limit.action.to_string(),
            limit.enabled
        );
    }
}
