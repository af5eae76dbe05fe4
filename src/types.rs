//! Core types for the jsbox sandbox: error taxonomy, call options, and the
//! limits shared across the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Upper bound for per-call timeouts, in milliseconds (one hour).
///
/// Values above this are rejected as nonsensical rather than silently
/// accepted and never enforced.
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Default guest heap size: 64 MiB.
pub const DEFAULT_HEAP_SIZE: u64 = 64 * 1024 * 1024;
/// Default guest stack size: 1 MiB.
pub const DEFAULT_STACK_SIZE: u64 = 1024 * 1024;
/// Default event input buffer size: 256 KiB.
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 256 * 1024;
/// Default result output buffer size: 256 KiB.
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 256 * 1024;

/// Errors that can occur during sandbox operations.
///
/// Every failure maps to exactly one stable machine-readable code, returned
/// by [`SandboxError::code`]. The display message is advisory; the code is
/// the discriminant callers should branch on.
///
/// Stage misuse (calling into a stage after its terminating operation) is
/// not represented here: stages are consumed by value, so reuse is a
/// compile error rather than a runtime code.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// A validated input failed a constraint: empty handler name,
    /// non-positive size, out-of-range timeout, unknown handler, or a
    /// snapshot from a different sandbox.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// A call was attempted on a sandbox whose poisoned flag is set.
    /// Restore a snapshot or unload to recover.
    #[error("sandbox is poisoned; restore a snapshot or unload to recover")]
    Poisoned,

    /// The current call was terminated by a monitor or an explicit `kill`.
    /// The sandbox is poisoned afterwards.
    #[error("guest execution was cancelled")]
    Cancelled,

    /// The guest exhausted its stack. The sandbox is poisoned afterwards.
    #[error("guest stack overflow")]
    StackOverflow,

    /// The guest aborted: an uncaught guest exception, a failed host call,
    /// a heap-limit kill, or a result that overflowed the output buffer.
    /// The sandbox is poisoned afterwards.
    #[error("guest aborted: {0}")]
    GuestAbort(String),

    /// Engine allocation, bootstrap, handler compilation, snapshot or
    /// restore plumbing failed, or a monitor failed to prepare. The guest
    /// was not left mid-instruction; the poisoned flag is untouched.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SandboxError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::InvalidArg(_) => "invalid-arg",
            SandboxError::Poisoned => "poisoned",
            SandboxError::Cancelled => "cancelled",
            SandboxError::StackOverflow => "stack-overflow",
            SandboxError::GuestAbort(_) => "guest-abort",
            SandboxError::Internal(_) => "internal",
        }
    }
}

/// Per-call options for [`LoadedSandbox::call_handler`].
///
/// An empty value is equivalent to all fields absent: no monitors, garbage
/// collection enabled. Unrecognized fields in a deserialized options value
/// are ignored.
///
/// [`LoadedSandbox::call_handler`]: crate::sandbox::LoadedSandbox::call_handler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CallOptions {
    /// Kill the call after this much real elapsed time.
    /// Must be positive and at most [`MAX_TIMEOUT_MS`].
    pub wall_clock_timeout_ms: Option<u64>,
    /// Kill the call after the vCPU thread has burned this much CPU time.
    /// Must be positive and at most [`MAX_TIMEOUT_MS`].
    pub cpu_timeout_ms: Option<u64>,
    /// Run an engine garbage-collection pass after the handler returns.
    /// Defaults to `true`.
    pub gc: Option<bool>,
}

impl CallOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        validate_timeout(self.wall_clock_timeout_ms, "wall-clock timeout")?;
        validate_timeout(self.cpu_timeout_ms, "cpu timeout")?;
        Ok(())
    }

    pub(crate) fn run_gc(&self) -> bool {
        self.gc.unwrap_or(true)
    }
}

fn validate_timeout(value: Option<u64>, what: &str) -> Result<()> {
    match value {
        Some(0) => Err(SandboxError::InvalidArg(format!(
            "{what} must be greater than zero"
        ))),
        Some(ms) if ms > MAX_TIMEOUT_MS => Err(SandboxError::InvalidArg(format!(
            "{what} of {ms}ms exceeds the maximum of {MAX_TIMEOUT_MS}ms"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(SandboxError::InvalidArg("x".into()).code(), "invalid-arg");
        assert_eq!(SandboxError::Poisoned.code(), "poisoned");
        assert_eq!(SandboxError::Cancelled.code(), "cancelled");
        assert_eq!(SandboxError::StackOverflow.code(), "stack-overflow");
        assert_eq!(SandboxError::GuestAbort("x".into()).code(), "guest-abort");
        assert_eq!(SandboxError::Internal("x".into()).code(), "internal");
    }

    #[test]
    fn default_options_are_unmonitored_with_gc() {
        let options = CallOptions::default();
        assert!(options.wall_clock_timeout_ms.is_none());
        assert!(options.cpu_timeout_ms.is_none());
        assert!(options.run_gc());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let options = CallOptions {
            wall_clock_timeout_ms: Some(0),
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert_eq!(err.code(), "invalid-arg");
    }

    #[test]
    fn oversized_timeout_rejected() {
        let options = CallOptions {
            cpu_timeout_ms: Some(4_000_000),
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert_eq!(err.code(), "invalid-arg");
    }

    #[test]
    fn one_hour_timeout_accepted() {
        let options = CallOptions {
            wall_clock_timeout_ms: Some(MAX_TIMEOUT_MS),
            cpu_timeout_ms: Some(1),
            ..Default::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn unknown_option_fields_are_ignored() {
        let options: CallOptions = serde_json::from_str(
            r#"{"wall-clock-timeout-ms": 500, "gc": false, "not-a-field": 7}"#,
        )
        .unwrap();
        assert_eq!(options.wall_clock_timeout_ms, Some(500));
        assert_eq!(options.gc, Some(false));
        assert!(!options.run_gc());
    }
}
