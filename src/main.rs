mod auth;
mod calc;
mod config;
mod db;
mod events;
mod ipc;
mod logging;
mod schedule;
mod setup;

use std::io::{self, BufRead, Write};

fn main() {
    let config = config::Config::from_env();
    if let Err(e) = logging::init_tracing(config.log_filter.as_deref()) {
        eprintln!("toppersd: logging disabled: {e}");
    }

    let mut state = ipc::AppState::default();
    if let Some(path) = config.workspace.clone() {
        // A bad startup workspace leaves the sidecar usable through workspace.select.
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            tracing::error!(error = ?e, "startup workspace could not be opened");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "toppersd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                tracing::warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed, exiting");
}
