//! Loaded-Runtime stage: a bootstrapped engine plus the handler registry.

use std::collections::HashMap;

use crate::observability::metrics;
use crate::sandbox::loaded::LoadedSandbox;
use crate::types::{Result, SandboxError};
use crate::vm::machine::Machine;
use crate::vm::MachineSnapshot;

/// A sandbox with the runtime loaded and an in-memory handler registry.
///
/// Registry operations never enter the vCPU; sources are only compiled
/// when [`load_handlers`](Self::load_handlers) terminates the stage.
/// Routing keys are unique: re-adding a name overwrites the previous
/// source.
pub struct RuntimeSandbox {
    machine: Machine,
    /// Engine state right after bootstrap, before any handler existed.
    baseline: MachineSnapshot,
    handlers: HashMap<String, String>,
}

impl RuntimeSandbox {
    pub(crate) fn new(machine: Machine, baseline: MachineSnapshot) -> Self {
        Self {
            machine,
            baseline,
            handlers: HashMap::new(),
        }
    }

    /// Register `source` under the routing key `name`. The source must
    /// declare a function literally named `handler`; it is not parsed
    /// here, compilation happens at `load_handlers`.
    pub fn add_handler(&mut self, name: impl Into<String>, source: impl Into<String>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(SandboxError::InvalidArg(
                "handler name must not be empty".to_string(),
            ));
        }
        if self.handlers.insert(name.clone(), source.into()).is_some() {
            log::debug!("handler '{name}' replaced");
        }
        Ok(())
    }

    /// Remove the handler registered under `name`.
    pub fn remove_handler(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SandboxError::InvalidArg(
                "handler name must not be empty".to_string(),
            ));
        }
        match self.handlers.remove(name) {
            Some(_) => Ok(()),
            None => Err(SandboxError::InvalidArg(format!(
                "no handler registered under '{name}'"
            ))),
        }
    }

    /// Drop every registered handler.
    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the sandbox is poisoned. A fresh runtime stage never is;
    /// the accessor exists so callers can hold either stage generically.
    pub fn poisoned(&self) -> bool {
        false
    }

    /// Enter the vCPU once to compile every registered handler, producing
    /// the callable stage. An empty registry is rejected; a compile error
    /// in any handler is internal and consumes the stage.
    pub fn load_handlers(mut self) -> Result<LoadedSandbox> {
        if self.handlers.is_empty() {
            return Err(SandboxError::InvalidArg(
                "no handlers registered".to_string(),
            ));
        }
        for (name, source) in &self.handlers {
            self.machine.compile_handler(name, source)?;
        }
        metrics().handler_loads.bump();
        log::debug!(
            "{} handler(s) compiled into machine {}",
            self.handlers.len(),
            self.machine.id()
        );
        let names = self.handlers.into_keys().collect();
        Ok(LoadedSandbox::new(self.machine, self.baseline, names))
    }
}

impl std::fmt::Debug for RuntimeSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("RuntimeSandbox")
            .field("handlers", &names)
            .finish()
    }
}
