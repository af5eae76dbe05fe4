//! Proto stage: an allocated engine with nothing running in it.

use crate::observability::metrics;
use crate::sandbox::runtime::RuntimeSandbox;
use crate::types::Result;
use crate::vm::machine::Machine;

/// A sandbox with engine resources allocated but no runtime bootstrapped.
///
/// Terminated by [`load_runtime`](Self::load_runtime). Bootstrap failures
/// are fatal: the stage is consumed and there is no recovery path.
pub struct ProtoSandbox {
    machine: Machine,
}

impl ProtoSandbox {
    pub(crate) fn new(machine: Machine) -> Self {
        Self { machine }
    }

    /// Enter the vCPU to bootstrap the runtime: handler table, dispatch
    /// entry point, host-call wiring, clock intrinsic. On success the
    /// baseline state (no handlers) is captured; `unload` later returns to
    /// exactly this point.
    pub fn load_runtime(mut self) -> Result<RuntimeSandbox> {
        self.machine.bootstrap()?;
        let baseline = self.machine.snapshot()?;
        metrics().runtime_loads.bump();
        log::debug!("runtime loaded into machine {}", self.machine.id());
        Ok(RuntimeSandbox::new(self.machine, baseline))
    }
}

impl std::fmt::Debug for ProtoSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoSandbox").finish()
    }
}
