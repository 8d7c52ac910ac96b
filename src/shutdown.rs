//! Graceful shutdown coordinator.
//!
//! The first SIGINT, SIGTERM or SIGHUP cancels the run's
//! [`CancellationToken`]: no new keys are started and in-flight transfers
//! get the grace period to finish. A second signal exits immediately.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

/// Exit status for a forced shutdown (128 + SIGINT).
const FORCE_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    Drain,
    ForceExit,
}

/// First signal cancels `token` so the run drains; any later one forces exit.
fn on_signal(count: &AtomicU32, token: &CancellationToken) -> SignalAction {
    if count.fetch_add(1, Ordering::SeqCst) == 0 {
        tracing::info!("Received shutdown signal, finishing in-flight downloads...");
        tracing::info!("Press Ctrl+C again to force exit");
        token.cancel();
        SignalAction::Drain
    } else {
        tracing::warn!("Force exit requested");
        SignalAction::ForceExit
    }
}

/// Register signal listeners and return the token they cancel.
///
/// Must be called from inside the tokio runtime.
pub(crate) fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = AtomicU32::new(0);

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                    return;
                }
            }

            if on_signal(&count, &handler_token) == SignalAction::ForceExit {
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
