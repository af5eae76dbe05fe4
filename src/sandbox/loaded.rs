//! Handlers-Loaded stage: the call path, snapshots, and poison recovery.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::monitor::runtime::monitor_runtime;
use crate::monitor::{CpuTimeMonitor, MonitorSet, WallClockMonitor};
use crate::observability::metrics;
use crate::sandbox::snapshot::SandboxSnapshot;
use crate::types::{CallOptions, Result, SandboxError};
use crate::vm::machine::Machine;
use crate::vm::{InterruptHandle, MachineSnapshot};

/// Aborts the spawned watch task when the call path unwinds, whether the
/// guest finished first or the call failed on the way in.
struct WatchTask(JoinHandle<()>);

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A sandbox with compiled handlers, ready to take calls.
///
/// One call runs at a time; the vCPU blocks the calling thread until the
/// guest finishes or is killed. A killed guest leaves the engine
/// mid-instruction, so the stage moves to the poisoned substate: every
/// operation except [`restore`](Self::restore), [`unload`](Self::unload),
/// and the [`poisoned`](Self::poisoned) read is rejected until a restore
/// succeeds. A host that intends to use timeouts should take a snapshot
/// *before* the first guarded call, or unload is the only way back.
pub struct LoadedSandbox {
    machine: Machine,
    baseline: MachineSnapshot,
    names: HashSet<String>,
    poisoned: Arc<AtomicBool>,
}

impl LoadedSandbox {
    pub(crate) fn new(machine: Machine, baseline: MachineSnapshot, names: HashSet<String>) -> Self {
        Self {
            machine,
            baseline,
            names,
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invoke the handler registered under `name` with a JSON event.
    ///
    /// Timeout fields in `options` attach the corresponding built-in
    /// monitors; both present race each other. `options.gc` (default true)
    /// runs an engine GC pass after a successful call.
    pub fn call_handler(
        &mut self,
        name: &str,
        event: &serde_json::Value,
        options: &CallOptions,
    ) -> Result<serde_json::Value> {
        options.validate()?;
        let gc = options.run_gc();
        match (options.wall_clock_timeout_ms, options.cpu_timeout_ms) {
            (None, None) => self.execute(name, event, gc),
            (Some(wall), None) => {
                let monitor = WallClockMonitor::new(Duration::from_millis(wall))?;
                self.execute_monitored(name, event, gc, &monitor)
            }
            (None, Some(cpu)) => {
                let monitor = CpuTimeMonitor::new(Duration::from_millis(cpu))?;
                self.execute_monitored(name, event, gc, &monitor)
            }
            (Some(wall), Some(cpu)) => {
                let monitors = (
                    WallClockMonitor::new(Duration::from_millis(wall))?,
                    CpuTimeMonitor::new(Duration::from_millis(cpu))?,
                );
                self.execute_monitored(name, event, gc, &monitors)
            }
        }
    }

    /// Invoke a handler under a caller-supplied monitor set.
    ///
    /// Custom monitors compose with the built-in ones through tuples. If
    /// any member of the set fails to prepare, the call fails with an
    /// internal error and the guest is never entered.
    pub fn call_handler_with_monitor<M: MonitorSet>(
        &mut self,
        name: &str,
        event: &serde_json::Value,
        monitors: &M,
        gc: Option<bool>,
    ) -> Result<serde_json::Value> {
        self.execute_monitored(name, event, gc.unwrap_or(true), monitors)
    }

    /// Take a snapshot of the current sandbox state.
    pub fn snapshot(&mut self) -> Result<SandboxSnapshot> {
        if self.poisoned() {
            return Err(SandboxError::Poisoned);
        }
        let machine = self.machine.snapshot()?;
        metrics().snapshots_taken.bump();
        Ok(SandboxSnapshot {
            machine,
            names: self.names.clone(),
        })
    }

    /// Overwrite the sandbox state with a snapshot taken from this
    /// sandbox, clearing the poisoned flag on success. On failure the
    /// sandbox keeps its prior state, poisoned flag included.
    pub fn restore(&mut self, snapshot: &SandboxSnapshot) -> Result<()> {
        self.machine.restore(&snapshot.machine)?;
        self.names = snapshot.names.clone();
        self.poisoned.store(false, Ordering::Release);
        metrics().snapshots_restored.bump();
        Ok(())
    }

    /// Discard the compiled handlers and return to the Loaded-Runtime
    /// stage with an empty registry. Works on a poisoned sandbox: the
    /// engine is rebuilt from the baseline captured at `load_runtime`.
    pub fn unload(self) -> Result<super::RuntimeSandbox> {
        let Self {
            mut machine,
            baseline,
            ..
        } = self;
        machine.restore(&baseline)?;
        metrics().sandbox_unloads.bump();
        Ok(super::RuntimeSandbox::new(machine, baseline))
    }

    /// A handle that can kill the in-flight call from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.machine.interrupt_handle()
    }

    /// Whether the sandbox is poisoned.
    pub fn poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Steps shared by every call flavor: poison gate, name validation,
    /// event framing.
    fn precheck(&mut self, name: &str, event: &serde_json::Value) -> Result<()> {
        if self.poisoned() {
            return Err(SandboxError::Poisoned);
        }
        if name.is_empty() {
            return Err(SandboxError::InvalidArg(
                "handler name must not be empty".to_string(),
            ));
        }
        if !self.names.contains(name) {
            return Err(SandboxError::InvalidArg(format!(
                "no handler registered under '{name}'"
            )));
        }
        self.machine.write_event(event)
    }

    fn execute(
        &mut self,
        name: &str,
        event: &serde_json::Value,
        gc: bool,
    ) -> Result<serde_json::Value> {
        self.precheck(name, event)?;
        let started = Instant::now();
        self.machine.begin_entry();
        let entered = self.machine.run_handler(name);
        self.finish(entered, gc, started)
    }

    fn execute_monitored<M: MonitorSet>(
        &mut self,
        name: &str,
        event: &serde_json::Value,
        gc: bool,
        monitors: &M,
    ) -> Result<serde_json::Value> {
        self.precheck(name, event)?;

        // Prepare on the calling thread. Any failure here fails the whole
        // call; the guest is never entered.
        let race = monitors.to_race().map_err(|e| {
            log::error!("execution monitor failed to initialize: {e}");
            SandboxError::Internal(format!("execution monitor failed to start: {e}"))
        })?;
        let runtime = monitor_runtime().ok_or_else(|| {
            SandboxError::Internal("monitor runtime is unavailable".to_string())
        })?;

        // Entry must be marked before the watch task exists: call entry
        // clears pending kills, and a monitor that fires instantly must
        // not have its kill wiped out by its own call.
        let started = Instant::now();
        self.machine.begin_entry();
        let interrupt = self.machine.interrupt_handle();
        let _watch = WatchTask(runtime.spawn(async move {
            race.await;
            interrupt.kill();
        }));

        let entered = self.machine.run_handler(name);
        self.finish(entered, gc, started)
    }

    /// Close out a call: decode the result and optionally GC on success,
    /// set the poisoned flag on exits that left the guest mid-instruction.
    fn finish(
        &mut self,
        entered: Result<()>,
        gc: bool,
        started: Instant,
    ) -> Result<serde_json::Value> {
        let outcome = match entered {
            Ok(()) => {
                let value = self.machine.read_result()?;
                if gc {
                    self.machine.collect_garbage()?;
                }
                metrics().handler_calls.bump();
                Ok(value)
            }
            Err(err) => {
                if matches!(
                    err,
                    SandboxError::Cancelled
                        | SandboxError::GuestAbort(_)
                        | SandboxError::StackOverflow
                ) {
                    self.poisoned.store(true, Ordering::Release);
                    log::warn!("sandbox poisoned: {err}");
                }
                metrics().handler_call_failures.bump();
                Err(err)
            }
        };
        metrics().call_duration.record(started.elapsed());
        outcome
    }
}

impl std::fmt::Debug for LoadedSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names.iter().collect();
        names.sort();
        f.debug_struct("LoadedSandbox")
            .field("handlers", &names)
            .field("poisoned", &self.poisoned())
            .finish()
    }
}
