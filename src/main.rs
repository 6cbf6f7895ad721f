use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing::info;

use team_schedule::config::{ScheduleConfig, DEFAULT_CONFIG_PATH};
use team_schedule::display::{print_window, write_window_to_file};
use team_schedule::export::export_window_csv;
use team_schedule::roster::Roster;
use team_schedule::slot::parse_date;
use team_schedule::{store, web, DateRange, MutationOutcome, SlotCoordinator, SlotKey, WeekWindow};

#[derive(Parser)]
#[command(name = "team-schedule", version, about = "Team booking grid over a document store")]
struct Cli {
    /// Config file (default: ./team-schedule.toml)
    #[arg(long, env = "TEAM_SCHEDULE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Web {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the grid for the window containing DATE
    Show {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        weeks: Option<u8>,
        /// Also write the grid to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Book a slot (blank VALUE clears it)
    Set {
        date: String,
        period: String,
        employee: String,
        value: String,
    },
    /// Clear a slot
    Clear {
        date: String,
        period: String,
        employee: String,
    },
    /// Copy a booking, e.g. `copy 2025-01-06_AM_JOSH 2025-01-06_AM_JOE`
    Copy { from: String, to: String },
    /// Move a booking to another slot
    Move { from: String, to: String },
    /// Write the window as CSV (stdout unless --out)
    Export {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        weeks: Option<u8>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "team_schedule=info,actix_web=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let mut config = ScheduleConfig::load(Some(config_path))
        .with_context(|| format!("loading config from {config_path}"))?;
    info!(
        path = config_path,
        backend = ?config.store.backend,
        "config loaded"
    );
    let store = store::open(&config.store)?;
    let roster = Roster::new(config.employees.clone());

    match cli.command {
        Command::Web { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            println!("Access the site at http://localhost:{}", config.server.port);
            web::start_server(config, store).await?;
        }
        Command::Show { date, weeks, out } => {
            let window = window(date.as_deref(), weeks.unwrap_or(config.weeks))?;
            let coordinator = SlotCoordinator::new(store, config.refresh);
            coordinator.request_range(window.range()).await?;
            let slots = coordinator.snapshot();
            print_window(&window.range(), &slots, &roster);
            if let Some(path) = out {
                write_window_to_file(&window.range(), &slots, &roster, &path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Schedule saved to {}", path.display());
            }
        }
        Command::Set {
            date,
            period,
            employee,
            value,
        } => {
            let key = roster.key(&date, &period, &employee)?;
            let coordinator = SlotCoordinator::new(store, config.refresh);
            run_set(&coordinator, key, &value).await?;
        }
        Command::Clear {
            date,
            period,
            employee,
        } => {
            let key = roster.key(&date, &period, &employee)?;
            let coordinator = SlotCoordinator::new(store, config.refresh);
            run_set(&coordinator, key, "").await?;
        }
        Command::Copy { from, to } => {
            let (source, target) = (roster.parse_id(&from)?, roster.parse_id(&to)?);
            let coordinator = SlotCoordinator::new(store, config.refresh);
            coordinator.request_range(span(&source, &target)).await?;
            let outcome = coordinator.copy(&source, target.clone()).await?;
            report(outcome, &format!("copied {source} -> {target}"));
        }
        Command::Move { from, to } => {
            let (source, target) = (roster.parse_id(&from)?, roster.parse_id(&to)?);
            let coordinator = SlotCoordinator::new(store, config.refresh);
            coordinator.request_range(span(&source, &target)).await?;
            let outcome = coordinator.move_slot(source.clone(), target.clone()).await?;
            report(outcome, &format!("moved {source} -> {target}"));
        }
        Command::Export { date, weeks, out } => {
            let window = window(date.as_deref(), weeks.unwrap_or(config.weeks))?;
            let coordinator = SlotCoordinator::new(store, config.refresh);
            coordinator.request_range(window.range()).await?;
            let slots = coordinator.snapshot();
            match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    export_window_csv(file, &window.range(), &slots, &roster)?;
                    eprintln!("Exported {} booked slots to {}", slots.len(), path.display());
                }
                None => export_window_csv(std::io::stdout(), &window.range(), &slots, &roster)?,
            }
        }
    }

    Ok(())
}

fn window(date: Option<&str>, weeks: u8) -> anyhow::Result<WeekWindow> {
    let anchor: NaiveDate = match date {
        Some(d) => parse_date(d)?,
        None => Local::now().date_naive(),
    };
    Ok(WeekWindow::new(anchor, weeks)?)
}

/// Smallest range holding both coordinates.
fn span(a: &SlotKey, b: &SlotKey) -> DateRange {
    DateRange::new(a.date.min(b.date), a.date.max(b.date))
}

async fn run_set(coordinator: &SlotCoordinator, key: SlotKey, value: &str) -> anyhow::Result<()> {
    coordinator.request_range(DateRange::new(key.date, key.date)).await?;
    let outcome = coordinator.set(key.clone(), value).await?;
    let what = match coordinator.get(&key) {
        Some(v) => format!("{key} = {v:?}"),
        None => format!("{key} cleared"),
    };
    report(outcome, &what);
    Ok(())
}

fn report(outcome: MutationOutcome, what: &str) {
    match outcome {
        MutationOutcome::Applied => println!("{what}"),
        MutationOutcome::NoOp => println!("nothing to do"),
    }
}
