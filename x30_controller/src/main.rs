use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use x30_controller::{config, Session, SessionEvent, SessionEventBus};

/// Client-side controller for the X30 quadruped inspection robot. Opens a
/// TCP session to the device and drives a navigation task from stdin
/// commands (§6.1).
#[derive(Debug, Parser)]
#[command(name = "controller")]
struct Opts {
    /// Hostname or IP address of the device.
    host: String,
    /// TCP port the device listens on.
    port: u16,
}

const HELP_TEXT: &str = "commands: start, cancel, status, help, quit";

fn install_tracing() {
    tracing_subscriber::fmt::init();
}

fn log_session_event(event: &SessionEvent) {
    match event {
        SessionEvent::NetworkError { message } => tracing::error!(%message, "network error"),
        SessionEvent::QueryStatus { status, value, error_code, .. } => {
            tracing::info!(?status, value, ?error_code, "status update")
        }
        SessionEvent::GetRealTimeStatus { pos_x, pos_y, pos_z, sum_odom, location, .. } => {
            tracing::info!(pos_x, pos_y, pos_z, sum_odom, ?location, "pose update")
        }
        SessionEvent::NavigationTask { status } => tracing::info!(?status, "navigation task"),
        SessionEvent::Error { code, message } => tracing::warn!(code, %message, "command error"),
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    install_tracing();
    let opts = Opts::parse();

    let points = config::load_navigation_points();
    let bus = Arc::new(SessionEventBus::new());
    for kind in ["network_error", "query_status", "get_real_time_status", "navigation_task", "error"] {
        bus.subscribe(kind, log_session_event);
    }

    let session = Session::new(points, bus);
    let init_result: anyhow::Result<()> = session
        .initialize(&opts.host, opts.port)
        .await
        .map_err(anyhow::Error::from);
    if let Err(err) = init_result {
        tracing::error!(%err, "failed to initialize session");
        return ExitCode::FAILURE;
    }

    println!("{HELP_TEXT}");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(%err, "failed to read stdin");
                break;
            }
        };
        match line.trim() {
            "help" => println!("{HELP_TEXT}"),
            "quit" => break,
            "" => {}
            command => session.handle_command(command),
        }
    }

    session.shutdown().await;
    ExitCode::SUCCESS
}
