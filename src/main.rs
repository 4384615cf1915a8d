use autopay_engine::application::Page;
use autopay_engine::application::insights::{AutopayDashboard, BalanceForecast, TopUpSuggestion};
use autopay_engine::application::orders::OrderProgress;
use autopay_engine::application::services::EngineServices;
use autopay_engine::config::EngineConfig;
use autopay_engine::domain::money::Amount;
use autopay_engine::domain::payment::PaymentRecord;
use autopay_engine::domain::ports::{ClockRef, StorageRef};
use autopay_engine::domain::wallet::{LedgerContext, WalletTransactionCategory};
use autopay_engine::infrastructure::clock::{FixedClock, SystemClock};
use autopay_engine::infrastructure::in_memory::{InMemoryStore, StaticCatalog};
use autopay_engine::infrastructure::notifier::TracingNotifier;
use autopay_engine::interfaces::csv::run_report_writer::RunReportWriter;
use autopay_engine::interfaces::csv::top_up_reader::TopUpReader;
use autopay_engine::interfaces::scenario::{Scenario, SeedReport};
use autopay_engine::telemetry;
use chrono::{FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Business date to act on instead of today (YYYY-MM-DD).
    #[arg(long, global = true)]
    date: Option<NaiveDate>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a scenario's users, streak table and orders into storage.
    Seed { scenario: PathBuf },
    /// Credit wallets from a CSV of `user, amount[, note]`.
    TopUp { input: PathBuf },
    /// Run one schedule slot now, for today or --date.
    Run {
        #[arg(long, default_value = "autopay-morning")]
        slot: String,
        /// Print a CSV report instead of JSON.
        #[arg(long)]
        csv: bool,
    },
    /// Re-attempt commission for payments that never got one.
    Reconcile,
    /// Play a scenario day by day against a fresh clock.
    Simulate {
        scenario: PathBuf,
        /// Overrides the scenario's day count.
        #[arg(long)]
        days: Option<u32>,
        /// Print a CSV report of the autopay runs instead of JSON.
        #[arg(long)]
        csv: bool,
    },
    /// Show configured slots with their next and last runs.
    Slots,
    /// Dashboard, balance forecast, suggested top-up and autopay history for one user.
    Insights {
        user: String,
        /// Forecast horizon in days.
        #[arg(long)]
        days: Option<u32>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Run the scheduler until interrupted.
    Serve,
}

#[derive(Serialize)]
struct BalanceLine {
    user_id: String,
    available: Decimal,
    locked: Decimal,
}

#[derive(Serialize)]
struct SimulationReport {
    seed: SeedReport,
    runs: Vec<autopay_engine::application::scheduler::RunSummary>,
    balances: Vec<BalanceLine>,
    orders: Vec<OrderProgress>,
}

#[derive(Serialize)]
struct UserInsights {
    dashboard: AutopayDashboard,
    orders: Vec<OrderProgress>,
    forecast: BalanceForecast,
    top_up: TopUpSuggestion,
    history: Page<PaymentRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_level, cli.log_json);

    let config = EngineConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let offset = config.offset().into_diagnostic()?;
    let storage = open_storage(cli.db_path.as_deref())?;

    match cli.command {
        Command::Seed { scenario } => {
            let scenario = Scenario::from_path(&scenario).into_diagnostic()?;
            let clock: ClockRef = Arc::new(FixedClock::at_date(
                cli.date.unwrap_or(scenario.start_date),
                offset,
            ));
            let services = build(&config, storage, scenario.catalog(), clock)?;
            let report = scenario.seed(&services).await.into_diagnostic()?;
            print_json(&report)?;
        }
        Command::TopUp { input } => {
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            let file = File::open(input).into_diagnostic()?;
            let mut touched = BTreeSet::new();
            for row in TopUpReader::new(file).rows() {
                let row = match row {
                    Ok(row) => row,
                    Err(e) => {
                        eprintln!("Error reading top-up: {}", e);
                        continue;
                    }
                };
                let credited = async {
                    services.orders.get_user(&row.user).await?;
                    let note = row.note.clone().unwrap_or_else(|| "Wallet top-up".to_string());
                    services
                        .wallets
                        .add_money(
                            &row.user,
                            Amount::new(row.amount)?,
                            LedgerContext::new(WalletTransactionCategory::TopUp, note),
                        )
                        .await
                }
                .await;
                match credited {
                    Ok(_) => {
                        touched.insert(row.user);
                    }
                    Err(e) => eprintln!("Error processing top-up: {}", e),
                }
            }
            print_json(&balances(&services, touched).await?)?;
        }
        Command::Run { slot, csv } => {
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            let summary = services.scheduler.trigger_slot(&slot).await.into_diagnostic()?;
            if csv {
                let stdout = io::stdout();
                let mut writer = RunReportWriter::new(stdout.lock());
                writer.write_summary(&summary).into_diagnostic()?;
            } else {
                print_json(&summary)?;
            }
        }
        Command::Reconcile => {
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            let summary = services.payments.reconcile_commissions().await.into_diagnostic()?;
            print_json(&summary)?;
        }
        Command::Simulate {
            scenario,
            days,
            csv,
        } => {
            let scenario = Scenario::from_path(&scenario).into_diagnostic()?;
            let clock = Arc::new(FixedClock::at_date(
                cli.date.unwrap_or(scenario.start_date),
                offset,
            ));
            let services = build(&config, storage, scenario.catalog(), clock.clone())?;
            let seed = scenario.seed(&services).await.into_diagnostic()?;
            let runs = scenario
                .simulate(&services, &clock, days.unwrap_or(scenario.days))
                .await
                .into_diagnostic()?;

            if csv {
                let stdout = io::stdout();
                let mut writer = RunReportWriter::new(stdout.lock());
                for run in runs.iter().filter(|r| !r.details.iter().all(|u| u.orders.is_empty())) {
                    writer.write_summary(run).into_diagnostic()?;
                }
                return Ok(());
            }

            let mut users: BTreeSet<String> = scenario.users.iter().map(|u| u.id.clone()).collect();
            users.extend(scenario.referrals.iter().map(|r| r.referrer_id.clone()));
            let mut orders = Vec::new();
            for user in &scenario.users {
                for order in services.storage.orders_for_user(&user.id).await.into_diagnostic()? {
                    orders.push(OrderProgress::of(&order));
                }
            }
            print_json(&SimulationReport {
                seed,
                runs,
                balances: balances(&services, users).await?,
                orders,
            })?;
        }
        Command::Slots => {
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            print_json(&services.scheduler.slot_status().await)?;
        }
        Command::Insights {
            user,
            days,
            page,
            limit,
        } => {
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            let insights = &services.insights;
            let report = UserInsights {
                dashboard: insights.autopay_dashboard(&user).await.into_diagnostic()?,
                orders: services
                    .orders
                    .orders_for_user(&user)
                    .await
                    .into_diagnostic()?
                    .iter()
                    .map(OrderProgress::of)
                    .collect(),
                forecast: insights.balance_forecast(&user, days).await.into_diagnostic()?,
                top_up: insights.suggested_top_up(&user, None).await.into_diagnostic()?,
                history: insights.autopay_history(&user, page, limit).await.into_diagnostic()?,
            };
            print_json(&report)?;
        }
        Command::Serve => {
            if cli.date.is_some() {
                miette::bail!(
                    "--date cannot be used with serve; the scheduler follows the system clock"
                );
            }
            let clock = clock_for(cli.date, offset);
            let services = build(&config, storage, StaticCatalog::new(), clock)?;
            let shutdown = CancellationToken::new();
            let scheduler = services.scheduler.clone();
            let worker = tokio::spawn({
                let shutdown = shutdown.clone();
                async move { scheduler.run(shutdown).await }
            });
            shutdown_signal().await;
            shutdown.cancel();
            worker.await.into_diagnostic()?;
            tracing::info!("Scheduler stopped");
        }
    }

    Ok(())
}

fn build(
    config: &EngineConfig,
    storage: StorageRef,
    catalog: StaticCatalog,
    clock: ClockRef,
) -> Result<EngineServices> {
    let catalog = Arc::new(catalog);
    EngineServices::new(
        config,
        storage,
        catalog.clone(),
        catalog,
        Arc::new(TracingNotifier),
        clock,
    )
    .into_diagnostic()
}

fn clock_for(date: Option<NaiveDate>, offset: FixedOffset) -> ClockRef {
    match date {
        Some(day) => Arc::new(FixedClock::at_date(day, offset)),
        None => Arc::new(SystemClock::new(offset)),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<&Path>) -> Result<StorageRef> {
    use autopay_engine::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<&Path>) -> Result<StorageRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}

async fn balances(services: &EngineServices, users: BTreeSet<String>) -> Result<Vec<BalanceLine>> {
    let mut lines = Vec::with_capacity(users.len());
    for user_id in users {
        let balance = services.wallets.get_balance(&user_id).await.into_diagnostic()?;
        lines.push(BalanceLine {
            user_id,
            available: balance.available,
            locked: balance.locked,
        });
    }
    Ok(lines)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
