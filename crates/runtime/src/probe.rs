//! Task-queue broker reachability check.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::RuntimeError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (and drop) a TCP connection to `address`.
pub async fn probe_broker(address: &str, timeout: Duration) -> Result<(), RuntimeError> {
    let unreachable = |reason: String| RuntimeError::Unreachable {
        address: address.to_string(),
        reason,
    };

    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => {
            info!(address, "Task-queue broker reachable");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(address, error = %e, "Task-queue broker unreachable");
            Err(unreachable(e.to_string()))
        }
        Err(_) => {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(address, timeout_ms, "Task-queue broker probe timed out");
            Err(unreachable(format!("no connection within {}ms", timeout.as_millis())))
        }
    }
}
