//! The sandbox lifecycle: four linear stages, each consumed exactly once
//! by its terminating operation.
//!
//! ```text
//! SandboxBuilder --build--> ProtoSandbox --load_runtime--> RuntimeSandbox
//!                                                              |    ^
//!                                                 load_handlers    unload
//!                                                              v    |
//!                                                          LoadedSandbox
//! ```
//!
//! Terminating operations take the stage by value, so using a stage after
//! its transition is a move error at compile time rather than a runtime
//! failure:
//!
//! ```compile_fail,E0382
//! use jsbox::SandboxBuilder;
//!
//! let builder = SandboxBuilder::new();
//! let _proto = builder.build();
//! let _again = builder.build(); // builder was consumed by the first build
//! ```
//!
//! ```compile_fail,E0382
//! use jsbox::SandboxBuilder;
//!
//! fn demo() -> jsbox::Result<()> {
//!     let mut runtime = SandboxBuilder::new().build()?.load_runtime()?;
//!     runtime.add_handler("echo", "function handler(e) { return e; }")?;
//!     let _loaded = runtime.load_handlers()?;
//!     runtime.add_handler("late", "function handler(e) { return e; }")?; // consumed
//!     Ok(())
//! }
//! ```
//!
//! ```compile_fail,E0382
//! use jsbox::SandboxBuilder;
//!
//! fn demo() -> jsbox::Result<()> {
//!     let mut runtime = SandboxBuilder::new().build()?.load_runtime()?;
//!     runtime.add_handler("echo", "function handler(e) { return e; }")?;
//!     let loaded = runtime.load_handlers()?;
//!     let _back = loaded.unload()?;
//!     let _ = loaded.poisoned(); // consumed by unload
//!     Ok(())
//! }
//! ```

mod builder;
mod loaded;
mod proto;
mod runtime;
mod snapshot;

pub use builder::SandboxBuilder;
pub use loaded::LoadedSandbox;
pub use proto::ProtoSandbox;
pub use runtime::RuntimeSandbox;
pub use snapshot::SandboxSnapshot;
