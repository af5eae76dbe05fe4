//! Wall-clock execution monitor.

use std::future::Future;
use std::time::Duration;

use crate::types::{Result, SandboxError};

use super::ExecutionMonitor;

/// Kills a call after a fixed amount of real elapsed time, including time
/// the guest spends blocked in host calls rather than burning CPU.
#[derive(Debug, Clone)]
pub struct WallClockMonitor {
    timeout: Duration,
}

impl WallClockMonitor {
    /// Create a wall-clock monitor. Zero timeouts are rejected.
    pub fn new(timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SandboxError::InvalidArg(
                "wall-clock timeout must be non-zero".to_string(),
            ));
        }
        Ok(Self { timeout })
    }
}

impl ExecutionMonitor for WallClockMonitor {
    fn prepare(&self) -> Result<impl Future<Output = ()> + Send + 'static> {
        let timeout = self.timeout;
        Ok(async move {
            tokio::time::sleep(timeout).await;
            log::warn!(
                "wall-clock timeout of {}ms exceeded",
                timeout.as_millis()
            );
        })
    }

    fn name(&self) -> &'static str {
        "wall-clock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_rejected() {
        let err = WallClockMonitor::new(Duration::ZERO).unwrap_err();
        assert_eq!(err.code(), "invalid-arg");
    }

    #[test]
    fn prepare_is_infallible_for_valid_timeouts() {
        let monitor = WallClockMonitor::new(Duration::from_millis(100)).unwrap();
        assert!(monitor.prepare().is_ok());
        // The same monitor can arm any number of calls.
        assert!(monitor.prepare().is_ok());
    }

    #[test]
    fn name_is_stable() {
        let monitor = WallClockMonitor::new(Duration::from_secs(1)).unwrap();
        assert_eq!(monitor.name(), "wall-clock");
    }
}
