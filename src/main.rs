mod auth;
mod calc;
mod config;
mod db;
mod import;
mod ipc;
mod model;

use clap::Parser;
use config::{Cli, Command};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter {:?}: {}; using srmsd=info", directives, e);
        EnvFilter::new("srmsd=info")
    });
    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn select_workspace(state: &mut ipc::AppState, path: &PathBuf) -> serde_json::Value {
    ipc::handle_request(
        state,
        ipc::Request::new("workspace", "workspace.select", json!({ "path": path })),
    )
}

fn is_ok(resp: &serde_json::Value) -> bool {
    resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn serve(workspace: Option<PathBuf>) {
    let mut state = ipc::AppState::default();
    if let Some(path) = workspace {
        let resp = select_workspace(&mut state, &path);
        if !is_ok(&resp) {
            tracing::error!(response = %resp, "could not open startup workspace");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "serving requests on stdin");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // Can't reply with an id we could not read.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        let _ = writeln!(stdout, "{}", resp);
        let _ = stdout.flush();
    }
    tracing::info!("request stream ended");
}

fn run_once(workspace: PathBuf, req: ipc::Request) -> ExitCode {
    let mut state = ipc::AppState::default();
    let opened = select_workspace(&mut state, &workspace);
    if !is_ok(&opened) {
        eprintln!("{}", opened["error"]);
        return ExitCode::FAILURE;
    }

    let resp = ipc::handle_request(&mut state, req);
    if !is_ok(&resp) {
        eprintln!("{}", resp["error"]);
        return ExitCode::FAILURE;
    }
    match serde_json::to_string_pretty(&resp["result"]) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("could not render result: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let command = cli.command.unwrap_or(Command::Serve { workspace: None });
    match command.one_shot() {
        Some((workspace, req)) => run_once(workspace, req),
        None => {
            let Command::Serve { workspace } = command else {
                return ExitCode::FAILURE;
            };
            serve(workspace);
            ExitCode::SUCCESS
        }
    }
}
