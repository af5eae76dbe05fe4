//! Execution monitors: resource predicates raced against a guest call.
//!
//! A monitor produces, per call, a watch future that stays pending while
//! the call is within limits and completes when the call must die. The
//! call path spawns the (composed) future on a shared runtime; when it
//! completes, the sandbox's interrupt handle kills the guest and the call
//! returns `cancelled`.
//!
//! The contract is split in two:
//!
//! - [`ExecutionMonitor`] is what users implement: a `prepare` step that
//!   runs synchronously on the thread that will enter the vCPU (so
//!   monitors can capture thread-local state, like a thread CPU clock) and
//!   returns the watch future, plus a short stable `name` used as the
//!   metric label when the monitor wins.
//! - [`MonitorSet`] is the sealed composition layer the call path is
//!   bounded on. Every `ExecutionMonitor` is a `MonitorSet` of one via a
//!   blanket impl, and tuples of up to five monitors form a set whose
//!   predicates are OR'd: the watch futures are raced and the first to
//!   fire terminates the call, with the winner's name recorded against
//!   `monitor_terminations_total`.
//!
//! Preparation fails closed. If any member of a set returns `Err` from
//! `prepare`, the whole call fails with an internal error and the guest is
//! never entered; a handler cannot run unmonitored because its monitor
//! broke. The first error is propagated unchanged.
//!
//! Wall-clock and CPU-time monitors catch complementary abuse: CPU time
//! alone misses a guest that parks on host resources without burning
//! cycles, and wall clock alone punishes legitimately bursty compute. Use
//! both as a tuple when in doubt:
//!
//! ```no_run
//! use std::time::Duration;
//! use jsbox::{CpuTimeMonitor, WallClockMonitor};
//!
//! # fn demo(sandbox: &mut jsbox::LoadedSandbox) -> jsbox::Result<()> {
//! let monitors = (
//!     WallClockMonitor::new(Duration::from_secs(5))?,
//!     CpuTimeMonitor::new(Duration::from_millis(500))?,
//! );
//! let result = sandbox.call_handler_with_monitor(
//!     "handler",
//!     &serde_json::json!({}),
//!     &monitors,
//!     None,
//! )?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::observability::metrics;
use crate::types::Result;

mod cpu_time;
pub(crate) mod runtime;
mod wall_clock;

pub use cpu_time::CpuTimeMonitor;
pub use wall_clock::WallClockMonitor;

/// Record a monitor-driven termination under the winner's name.
fn record_termination(winner: &'static str) {
    metrics().monitor_terminations.bump(winner);
    log::warn!("monitor '{winner}' fired; killing guest execution");
}

/// A resource predicate raced against a guest call.
///
/// # Contract
///
/// - `prepare` runs synchronously on the calling thread, the thread that
///   will enter the vCPU. Capture thread-local state here. Returning `Err`
///   fails the call closed; the handler never runs.
/// - The returned future is spawned on the shared monitor runtime. It must
///   stay pending while the call is within limits and complete when the
///   call should be killed. It is dropped if the call finishes first.
///
/// # Example
///
/// ```no_run
/// use std::future::Future;
/// use std::time::Duration;
/// use jsbox::ExecutionMonitor;
///
/// struct DeadlineMonitor {
///     limit: Duration,
/// }
///
/// impl ExecutionMonitor for DeadlineMonitor {
///     fn prepare(&self) -> jsbox::Result<impl Future<Output = ()> + Send + 'static> {
///         let limit = self.limit;
///         Ok(async move {
///             tokio::time::sleep(limit).await;
///         })
///     }
///
///     fn name(&self) -> &'static str {
///         "deadline"
///     }
/// }
/// ```
pub trait ExecutionMonitor: Send + Sync {
    /// Produce the watch future for one call. Runs on the calling thread.
    fn prepare(&self) -> Result<impl Future<Output = ()> + Send + 'static>;

    /// Stable short name, used as the metric label when this monitor
    /// terminates a call.
    fn name(&self) -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// A set of monitors whose predicates are OR'd into one racing future.
///
/// Sealed: implemented for every [`ExecutionMonitor`] (a set of one) and
/// for tuples of up to five monitors. The call path bounds on this trait;
/// user code only ever implements [`ExecutionMonitor`].
pub trait MonitorSet: private::Sealed + Send + Sync {
    /// Prepare every member on the calling thread and combine the watch
    /// futures into a single future that completes when the first member
    /// fires, recording the winner. Fails closed on the first prepare
    /// error.
    fn to_race(&self) -> Result<Pin<Box<dyn Future<Output = ()> + Send>>>;
}

impl<M: ExecutionMonitor> private::Sealed for M {}

impl<M: ExecutionMonitor> MonitorSet for M {
    fn to_race(&self) -> Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
        let watch = self.prepare()?;
        let name = self.name();
        Ok(Box::pin(async move {
            watch.await;
            record_termination(name);
        }))
    }
}

/// Implements [`MonitorSet`] for a tuple of monitors. Each member's
/// `prepare` runs on the calling thread, in tuple order, stopping at the
/// first error; the watch futures are raced with `tokio::select!`.
macro_rules! impl_monitor_set_for_tuple {
    (($($field:ident: $member:ident),+)) => {
        impl<$($member: ExecutionMonitor),+> private::Sealed for ($($member,)+) {}

        impl<$($member: ExecutionMonitor),+> MonitorSet for ($($member,)+) {
            fn to_race(&self) -> Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
                let ($($field,)+) = &self;
                $(let $field = ($field.prepare()?, $field.name());)+

                Ok(Box::pin(async move {
                    let winner = tokio::select! {
                        $(_ = $field.0 => $field.1,)+
                    };
                    record_termination(winner);
                }))
            }
        }
    };
}

// A 1-tuple would already satisfy MonitorSet through the blanket impl on
// the bare monitor, but `(m,)` is a distinct type and should compile too.
impl_monitor_set_for_tuple!((m0: M0));
impl_monitor_set_for_tuple!((m0: M0, m1: M1));
impl_monitor_set_for_tuple!((m0: M0, m1: M1, m2: M2));
impl_monitor_set_for_tuple!((m0: M0, m1: M1, m2: M2, m3: M3));
impl_monitor_set_for_tuple!((m0: M0, m1: M1, m2: M2, m3: M3, m4: M4));
