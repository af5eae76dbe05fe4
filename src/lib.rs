//! jsbox: run untrusted JavaScript event handlers inside an embedded
//! micro-VM with hard resource control.
//!
//! A host builds a sandbox through a linear four-stage lifecycle, registers
//! handler sources (each declaring a function named `handler`), and invokes
//! them with JSON events. Guest execution can be raced against wall-clock
//! and CPU-time monitors (or custom ones), killed from any thread through
//! an [`InterruptHandle`], and rolled back to an earlier
//! [`SandboxSnapshot`], which is also how a sandbox poisoned by a
//! mid-instruction kill is recovered.
//!
//! ```no_run
//! use jsbox::{CallOptions, SandboxBuilder};
//!
//! # fn main() -> jsbox::Result<()> {
//! let mut runtime = SandboxBuilder::new().build()?.load_runtime()?;
//! runtime.add_handler("echo", "function handler(event) { return event; }")?;
//! let mut sandbox = runtime.load_handlers()?;
//!
//! // Snapshot before any guarded call: this is the recovery point if a
//! // monitor has to kill the guest.
//! let checkpoint = sandbox.snapshot()?;
//!
//! let options = CallOptions {
//!     wall_clock_timeout_ms: Some(500),
//!     ..Default::default()
//! };
//! match sandbox.call_handler("echo", &serde_json::json!({"x": 1}), &options) {
//!     Ok(result) => println!("{result}"),
//!     Err(e) if e.code() == "cancelled" => sandbox.restore(&checkpoint)?,
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

pub mod monitor;
pub mod observability;
pub mod sandbox;
pub mod types;
pub mod vm;

pub use monitor::{CpuTimeMonitor, ExecutionMonitor, MonitorSet, WallClockMonitor};
pub use sandbox::{
    LoadedSandbox, ProtoSandbox, RuntimeSandbox, SandboxBuilder, SandboxSnapshot,
};
pub use types::{CallOptions, Result, SandboxError, MAX_TIMEOUT_MS};
pub use vm::InterruptHandle;
