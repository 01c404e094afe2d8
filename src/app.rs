use std::collections::HashSet;
use std::iter::once;

use clap::{
    Args, Parser, Subcommand,
    builder::{Styles, styling},
};
use lazy_static::lazy_static;
use nix::sys::signal::{self, SigHandler, Signal};

use crate::config::{Config, RunArgs};
use crate::local_logger::{ACCENT_U8_COLOR_CODE, init_local_logger};
use crate::prelude::*;
use crate::process::{Pid, SystemDirectory, resolver};
use crate::scope::ScopeMode;
use crate::session::{Session, SessionWindow, StopToken};
use crate::session::window::WINDOW_TIMESTAMP_FORMAT;

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(
            styling::Ansi256Color(ACCENT_U8_COLOR_CODE).on_default() | styling::Effects::BOLD,
        )
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Analyse the behavior of your programs", styles = create_styles())]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trace a command under a chosen user identity for a fixed lifetime
    Run(RunArgs),
    /// Show the window published by the last session and the processes it scopes
    Window(WindowArgs),
}

#[derive(Args, Debug)]
pub struct WindowArgs {
    /// Scope mode used to preview which observed processes belong to the session
    #[arg(long, value_enum, default_value_t = ScopeMode::All)]
    pub scope: ScopeMode,
}

lazy_static! {
    static ref STOP: StopToken = StopToken::new();
}

extern "C" fn handle_sigint(_: libc::c_int) {
    STOP.trigger();
}

fn install_stop_handler() -> Result<StopToken> {
    let token = STOP.clone();
    unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint)) }
        .context("Failed to install the interrupt handler")?;
    Ok(token)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;
    debug!("behavior-runner v{}", crate::VERSION);

    match cli.command {
        Commands::Run(args) => {
            let config = Config::try_from(args)?;
            let stop = install_stop_handler()?;
            let mut session = Session::new(config);
            if session.run(&stop)?.is_some() {
                info!("Session complete, inspect it with `behavior window`");
            }
        }
        Commands::Window(args) => show_window(&args)?,
    }
    Ok(())
}

/// Print the published session window together with the pid sets a scoped
/// query would be built from, and the live processes currently in scope.
fn show_window(args: &WindowArgs) -> Result<()> {
    let window = SessionWindow::load()?;
    info!(
        "Session started at {} (target pid {}, tracer pid {})",
        window.started_at.format(WINDOW_TIMESTAMP_FORMAT),
        window.target_pid,
        window.tracer_pid
    );

    let directory = SystemDirectory::snapshot();
    let target_descendants = resolver::resolve(&directory, &[window.target_pid])?;
    let tracer_descendants = resolver::resolve(&directory, &[window.tracer_pid])?;

    let launched: HashSet<Pid> = once(window.target_pid)
        .chain(target_descendants.iter().map(|record| record.pid))
        .collect();
    let excluded: HashSet<Pid> = once(window.tracer_pid)
        .chain(tracer_descendants.iter().map(|record| record.pid))
        .collect();
    debug!(
        "{} launched pid(s), {} tracer pid(s) excluded from scope",
        launched.len(),
        excluded.len()
    );

    let in_scope: Vec<_> = directory
        .records()
        .into_iter()
        .filter(|record| args.scope.includes(record, &launched, &excluded, window.started_at))
        .collect();

    info!("Showing {} ({} in scope):", args.scope, in_scope.len());
    for record in in_scope {
        info!(
            "  {} {:>7} {:<12} {}",
            record.started_at.format(WINDOW_TIMESTAMP_FORMAT),
            record.pid,
            record.user.as_deref().unwrap_or("-"),
            record.command
        );
    }
    Ok(())
}
