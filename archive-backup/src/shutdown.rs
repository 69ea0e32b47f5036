//! SIGINT and SIGTERM handling.
//!
//! A signal aborts the run by dropping its future. Guards owned by the run
//! clean up on drop: the archive file is removed and the compressor child is
//! killed.

use std::fmt;
use std::future::Future;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
pub async fn wait_for_signal() -> Signal {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => Signal::Interrupt,
        _ = terminate => Signal::Terminate,
    };
    info!("Received {}, aborting", received);
    received
}

/// Drive `work` to completion unless `signal` fires first.
///
/// On a signal `work` is dropped before this returns.
pub async fn until_signal<F, S>(work: F, signal: S) -> Result<F::Output, Signal>
where
    F: Future,
    S: Future<Output = Signal>,
{
    tokio::select! {
        output = work => Ok(output),
        received = signal => Err(received),
    }
}
