//! Shutdown signal plumbing.
//!
//! The pipeline itself runs on the blocking pool; the async side waits
//! here and trips the cancellation token that the read loop polls.

use tracing::info;

/// Resolve when the process is asked to stop (SIGINT, SIGTERM, or
/// SIGQUIT).
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Listener registration only fails when the runtime lacks a signal
    // driver, which the tokio::main macro always enables
    let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT listener");
    let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM listener");
    let mut quit = signal(SignalKind::quit()).expect("SIGQUIT listener");

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(message = "Signal received.", signal = name);
}

/// Wait for Ctrl-C where Unix signals are unavailable.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a working signal listener the run can only be stopped
        // by killing the process; never resolve.
        std::future::pending::<()>().await;
    }
    info!(message = "Signal received.", signal = "ctrl_c");
}
