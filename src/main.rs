//! `sortie` - live multi-party exercise runtime

use clap::Parser;
use tokio_util::sync::CancellationToken;

use sortie::cli::args::Cli;
use sortie::cli::commands;
use sortie::error::ExitCode;
use sortie::observability::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match commands::dispatch(cli, cancel).await {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// First SIGINT/SIGTERM cancels gracefully; a second one exits at once.
async fn shutdown_signal(cancel: CancellationToken) {
    let mut terminate = TerminateSignal::new();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = terminate.recv() => {}
    }
    eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");
    cancel.cancel();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
        () = terminate.recv() => std::process::exit(ExitCode::TERMINATED),
    }
}

/// SIGTERM where the platform has it; never fires elsewhere.
struct TerminateSignal {
    #[cfg(unix)]
    inner: Option<tokio::signal::unix::Signal>,
}

impl TerminateSignal {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let inner = match signal(SignalKind::terminate()) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    None
                }
            };
            Self { inner }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = self.inner.as_mut() {
            signal.recv().await;
            return;
        }
        std::future::pending::<()>().await;
    }
}
