//! Builder stage: accumulates machine geometry before any engine resources
//! exist.

use crate::observability::metrics;
use crate::sandbox::proto::ProtoSandbox;
use crate::types::{
    Result, SandboxError, DEFAULT_HEAP_SIZE, DEFAULT_INPUT_BUFFER_SIZE,
    DEFAULT_OUTPUT_BUFFER_SIZE, DEFAULT_STACK_SIZE,
};
use crate::vm::machine::{Machine, MachineConfig};

/// Entry point of the sandbox lifecycle.
///
/// Setters validate eagerly and return the builder for chaining; `build`
/// consumes it and allocates the engine. A consumed builder cannot be
/// reused; see the [module docs](crate::sandbox) for the lifecycle
/// contract.
///
/// ```no_run
/// use jsbox::SandboxBuilder;
///
/// # fn demo() -> jsbox::Result<()> {
/// let proto = SandboxBuilder::new()
///     .heap_size(32 * 1024 * 1024)?
///     .input_buffer_size(64 * 1024)?
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SandboxBuilder {
    heap_size: u64,
    stack_size: u64,
    input_buffer_size: usize,
    output_buffer_size: usize,
}

impl SandboxBuilder {
    pub fn new() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            stack_size: DEFAULT_STACK_SIZE,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
        }
    }

    /// Set the guest heap size in bytes. Must be positive.
    pub fn heap_size(mut self, bytes: u64) -> Result<Self> {
        self.heap_size = positive_u64(bytes, "heap size")?;
        Ok(self)
    }

    /// Set the guest stack size in bytes. Must be positive.
    ///
    /// The stack size is an engine-wide setting fixed at the first build
    /// in the process; later builders asking for a different value keep
    /// the first one (with a warning).
    pub fn stack_size(mut self, bytes: u64) -> Result<Self> {
        self.stack_size = positive_u64(bytes, "stack size")?;
        Ok(self)
    }

    /// Set the event input buffer size in bytes. Must be positive.
    pub fn input_buffer_size(mut self, bytes: usize) -> Result<Self> {
        self.input_buffer_size = positive_usize(bytes, "input buffer size")?;
        Ok(self)
    }

    /// Set the result output buffer size in bytes. Must be positive.
    pub fn output_buffer_size(mut self, bytes: usize) -> Result<Self> {
        self.output_buffer_size = positive_usize(bytes, "output buffer size")?;
        Ok(self)
    }

    /// Allocate the engine and guest buffers, producing the proto stage.
    pub fn build(self) -> Result<ProtoSandbox> {
        let machine = Machine::new(MachineConfig {
            heap_size: self.heap_size,
            stack_size: self.stack_size,
            input_buffer_size: self.input_buffer_size,
            output_buffer_size: self.output_buffer_size,
        })?;
        metrics().sandboxes_built.bump();
        Ok(ProtoSandbox::new(machine))
    }
}

impl Default for SandboxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn positive_u64(value: u64, what: &str) -> Result<u64> {
    if value == 0 {
        return Err(SandboxError::InvalidArg(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(value)
}

fn positive_usize(value: usize, what: &str) -> Result<usize> {
    if value == 0 {
        return Err(SandboxError::InvalidArg(format!(
            "{what} must be greater than zero"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sizes_rejected() {
        assert_eq!(
            SandboxBuilder::new().heap_size(0).unwrap_err().code(),
            "invalid-arg"
        );
        assert_eq!(
            SandboxBuilder::new().stack_size(0).unwrap_err().code(),
            "invalid-arg"
        );
        assert_eq!(
            SandboxBuilder::new()
                .input_buffer_size(0)
                .unwrap_err()
                .code(),
            "invalid-arg"
        );
        assert_eq!(
            SandboxBuilder::new()
                .output_buffer_size(0)
                .unwrap_err()
                .code(),
            "invalid-arg"
        );
    }

    #[test]
    fn setters_chain() {
        let builder = SandboxBuilder::new()
            .heap_size(16 * 1024 * 1024)
            .and_then(|b| b.stack_size(256 * 1024))
            .and_then(|b| b.input_buffer_size(4096))
            .and_then(|b| b.output_buffer_size(4096))
            .unwrap();
        assert_eq!(builder.heap_size, 16 * 1024 * 1024);
        assert_eq!(builder.input_buffer_size, 4096);
    }
}
