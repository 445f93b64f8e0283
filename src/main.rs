//! # rollcall
//!
//! Command-line client for the attendance dashboard. `watch` keeps the
//! dashboard views live over the event stream; the other commands are
//! one-shot REST calls.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use rollcall_live::ConnectionSupervisor;
use rollcall_settings::RollcallSettings;
use rollcall_telemetry::{init_telemetry, TelemetryConfig};
use rollcall_views::notify::NullSink;
use rollcall_views::{
    AttendanceApi, AttendanceBoard, BoardParams, BoardTab, ChannelSink, DashboardView,
    EmployeeFilter, FetchOutcome, HttpAttendanceApi, LiveView, ManualCheckout, NotificationSink,
    RosterView, ViewSubscription,
};
use tracing::info;

/// Live attendance dashboard client.
#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Live attendance dashboard client")]
struct Cli {
    /// Settings file (defaults to ~/.rollcall/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Backend base URL (overrides settings and ROLLCALL_SERVER_URL).
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount the live views and print updates until Ctrl-C.
    Watch(WatchArgs),
    /// Print backend, database and device status.
    Health,
    /// Record a manual checkout.
    Checkout {
        employee_id: String,
        /// HH:MM:SS, defaults to now on the server.
        #[arg(long)]
        time: Option<NaiveTime>,
        /// YYYY-MM-DD, defaults to today on the server.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Deactivate an employee and remove them from the device.
    Deactivate { employee_id: String },
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Attendance board tab: daily, logs or missed.
    #[arg(long, default_value = "daily")]
    tab: BoardTab,

    /// Attendance date (YYYY-MM-DD), defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Roster status filter (active, inactive, all).
    #[arg(long)]
    status: Option<String>,

    /// Roster name or id search.
    #[arg(long)]
    search: Option<String>,

    /// Roster department filter.
    #[arg(long)]
    department: Option<String>,
}

fn load_settings(cli: &Cli) -> Result<RollcallSettings> {
    let mut settings = match &cli.settings {
        Some(path) => rollcall_settings::load_settings_from_path(path),
        None => rollcall_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(server) = &cli.server {
        settings.server.base_url = server.clone();
    }
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let telemetry = TelemetryConfig::from_names(
        &settings.logging.level,
        settings
            .logging
            .modules
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        settings.logging.json,
    )?;
    init_telemetry(&telemetry)?;

    let api: Arc<dyn AttendanceApi> = Arc::new(
        HttpAttendanceApi::from_settings(&settings.server).context("Failed to build API client")?,
    );

    match cli.command {
        Command::Watch(args) => watch(&settings, api, args).await,
        Command::Health => {
            let health = api.health().await?;
            println!("backend:  {}", health.backend);
            println!("database: {}", health.database);
            println!(
                "device:   {}{}",
                health.device,
                if health.mock_mode { " (mock)" } else { "" }
            );
            Ok(())
        }
        Command::Checkout {
            employee_id,
            time,
            date,
        } => {
            let checkout = ManualCheckout {
                employee_id,
                checkout_time: time,
                date,
            };
            api.manual_checkout(&checkout)
                .await
                .with_context(|| format!("Checkout failed for {}", checkout.employee_id))?;
            println!("Checked out {}", checkout.employee_id);
            Ok(())
        }
        Command::Deactivate { employee_id } => {
            api.deactivate_employee(&employee_id)
                .await
                .with_context(|| format!("Could not deactivate {employee_id}"))?;
            println!("Deactivated {employee_id}");
            Ok(())
        }
    }
}

async fn watch(
    settings: &RollcallSettings,
    api: Arc<dyn AttendanceApi>,
    args: WatchArgs,
) -> Result<()> {
    let supervisor = ConnectionSupervisor::from_settings(settings)?;
    let live = supervisor.handle();

    let (sink, mut notices) = ChannelSink::channel();
    let notifier: Arc<dyn NotificationSink> = if settings.notifications.enabled {
        Arc::new(sink)
    } else {
        Arc::new(NullSink)
    };

    let date = args
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let filter = EmployeeFilter {
        status: args.status,
        search: args.search,
        department: args.department,
    };

    let mut board = ViewSubscription::new(
        AttendanceBoard::new(),
        live.clone(),
        Arc::clone(&api),
        Arc::clone(&notifier),
    );
    let mut roster = ViewSubscription::new(
        RosterView::new(),
        live.clone(),
        Arc::clone(&api),
        Arc::clone(&notifier),
    );
    let mut dashboard = ViewSubscription::new(DashboardView::new(), live.clone(), api, notifier);

    let outcome = board.mount(BoardParams::new(args.tab, date)).await;
    report(board.view(), outcome);
    let outcome = roster.mount(filter).await;
    report(roster.view(), outcome);
    let outcome = dashboard.mount(()).await;
    report(dashboard.view(), outcome);
    print_summary(&board, &roster, &dashboard);

    info!(endpoint = live.endpoint(), "watching, press Ctrl-C to stop");
    let mut state = live.watch_state();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("[stream] {current}");
            }
            Some(notice) = notices.recv() => {
                println!("[{}] {}", notice.severity, notice.message);
                print_summary(&board, &roster, &dashboard);
            }
        }
    }

    board.unmount();
    roster.unmount();
    dashboard.unmount();

    let stats = supervisor.stats();
    info!(
        attempts = stats.attempts,
        frames = stats.frames_received,
        malformed = stats.frames_malformed,
        reconnects = stats.reconnects_scheduled,
        "stream closed"
    );
    supervisor.shutdown();
    Ok(())
}

fn report<V: LiveView>(view: &V, outcome: FetchOutcome) {
    if let FetchOutcome::Failed(error) = outcome {
        eprintln!("{}: {}", view.name(), error.user_message());
    }
}

/// One line per view, from whatever each view last applied.
fn print_summary(
    board: &ViewSubscription<AttendanceBoard>,
    roster: &ViewSubscription<RosterView>,
    dashboard: &ViewSubscription<DashboardView>,
) {
    if let Some(snapshot) = board.view().snapshot() {
        println!(
            "  attendance: {} {} rows for {}",
            snapshot.data.len(),
            snapshot.params.tab,
            snapshot.params.date
        );
    }
    if let Some(snapshot) = roster.view().snapshot() {
        println!("  employees:  {}", snapshot.data.len());
    }
    if let Some(snapshot) = dashboard.view().snapshot() {
        let stats = snapshot.data;
        println!(
            "  dashboard:  {} present, {} absent, {} missed checkout of {}",
            stats.present_today, stats.absent_today, stats.missed_checkout, stats.total_employees
        );
    }
}
