//! CPU-time execution monitor.
//!
//! Measures the CPU time actually burned by the vCPU thread, not elapsed
//! wall time, so a guest cannot dodge the limit by blocking, and a bursty
//! but legitimate workload is not punished for waiting.

use std::future::Future;
use std::time::Duration;

use crate::types::{Result, SandboxError};

use super::ExecutionMonitor;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Kills a call after the vCPU thread has consumed a fixed CPU budget.
///
/// `prepare` captures the CPU clock of the calling thread (the thread
/// that will run the guest), so it must run there; the watch future then
/// polls that clock from the monitor runtime. Polling is adaptive: sleep
/// half the remaining budget, clamped to [1 ms, 10 ms].
#[derive(Debug, Clone)]
pub struct CpuTimeMonitor {
    limit: Duration,
}

impl CpuTimeMonitor {
    /// Create a CPU-time monitor. Zero limits are rejected.
    pub fn new(limit: Duration) -> Result<Self> {
        if limit.is_zero() {
            return Err(SandboxError::InvalidArg(
                "cpu timeout must be non-zero".to_string(),
            ));
        }
        Ok(Self { limit })
    }
}

impl ExecutionMonitor for CpuTimeMonitor {
    fn prepare(&self) -> Result<impl Future<Output = ()> + Send + 'static> {
        let clock = ThreadCpuClock::for_current_thread().ok_or_else(|| {
            SandboxError::Internal("failed to acquire the thread CPU clock".to_string())
        })?;
        let start = clock.elapsed_nanos().ok_or_else(|| {
            SandboxError::Internal("failed to read the thread CPU clock".to_string())
        })?;
        let limit = self.limit;
        let deadline = start.saturating_add(limit.as_nanos() as u64);

        Ok(async move {
            loop {
                let now = match clock.elapsed_nanos() {
                    Some(nanos) => nanos,
                    None => {
                        // Fail closed: an unreadable clock kills the call
                        // rather than letting it run unbounded.
                        log::error!("thread CPU clock became unreadable; killing guest");
                        return;
                    }
                };
                if now >= deadline {
                    log::warn!(
                        "cpu budget of {}ms exceeded ({}ms consumed)",
                        limit.as_millis(),
                        (now.saturating_sub(start)) / 1_000_000
                    );
                    return;
                }
                let remaining = deadline - now;
                let sleep_for =
                    Duration::from_nanos(remaining / 2).clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
                tokio::time::sleep(sleep_for).await;
            }
        })
    }

    fn name(&self) -> &'static str {
        "cpu-time"
    }
}

/// Per-thread CPU clock, readable from any thread.
#[cfg(target_os = "linux")]
struct ThreadCpuClock {
    clock_id: libc::clockid_t,
}

// SAFETY: the clock id comes from pthread_getcpuclockid and stays valid for
// the life of the thread it names. POSIX allows clock_gettime on a thread
// CPU clock from any thread; the reads carry no shared mutable state.
#[cfg(target_os = "linux")]
unsafe impl Send for ThreadCpuClock {}
#[cfg(target_os = "linux")]
unsafe impl Sync for ThreadCpuClock {}

#[cfg(target_os = "linux")]
impl ThreadCpuClock {
    fn for_current_thread() -> Option<Self> {
        let mut clock_id: libc::clockid_t = 0;
        let rc = unsafe { libc::pthread_getcpuclockid(libc::pthread_self(), &mut clock_id) };
        if rc != 0 {
            return None;
        }
        Some(Self { clock_id })
    }

    fn elapsed_nanos(&self) -> Option<u64> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(self.clock_id, &mut ts) };
        if rc != 0 {
            return None;
        }
        Some((ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64))
    }
}

/// Platforms without an accessible per-thread CPU clock fail closed at
/// `prepare` time.
#[cfg(not(target_os = "linux"))]
struct ThreadCpuClock;

#[cfg(not(target_os = "linux"))]
impl ThreadCpuClock {
    fn for_current_thread() -> Option<Self> {
        None
    }

    fn elapsed_nanos(&self) -> Option<u64> {
        None
    }
}
