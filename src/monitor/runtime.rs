//! Shared async runtime hosting monitor watch futures.
//!
//! One process-wide runtime, initialized on first monitor use. Worker
//! count comes from `JSBOX_MONITOR_THREADS` (read once; later changes
//! have no effect). Watch futures are cheap sleepers, so two workers cover
//! the common wall-clock + CPU-time pairing.

use once_cell::sync::Lazy;
use tokio::runtime::Runtime;

/// Environment variable naming the monitor runtime worker count.
pub(crate) const ENV_MONITOR_THREADS: &str = "JSBOX_MONITOR_THREADS";

const DEFAULT_MONITOR_WORKERS: usize = 2;

/// If runtime construction fails the `None` is cached for the life of the
/// process; every monitored call then fails closed instead of retrying.
static MONITOR_RUNTIME: Lazy<Option<Runtime>> = Lazy::new(|| {
    let workers = std::env::var(ENV_MONITOR_THREADS)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MONITOR_WORKERS);

    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("jsbox-monitor")
        .enable_time()
        .build()
    {
        Ok(runtime) => {
            log::debug!("monitor runtime initialized with {workers} workers");
            Some(runtime)
        }
        Err(e) => {
            log::error!("failed to build the monitor runtime: {e}; monitored calls will fail");
            None
        }
    }
});

/// The shared monitor runtime, or `None` if it could not be built.
pub(crate) fn monitor_runtime() -> Option<&'static Runtime> {
    MONITOR_RUNTIME.as_ref()
}
