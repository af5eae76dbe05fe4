//! The micro-VM: an embedded engine instance with a hard heap limit,
//! fixed-size event I/O buffers, an interrupt line, and whole-state
//! snapshot/rebuild.
//!
//! Everything above this module speaks in sandbox terms (stages, handlers,
//! monitors); everything below is the engine. The machine owns exactly one
//! isolate at a time and swaps it wholesale on snapshot, restore, and
//! unload; the interrupt handle and the I/O buffers are the only pieces
//! that survive a swap.

use std::sync::atomic::{AtomicBool, Ordering};

use deno_core::{v8, JsRuntimeForSnapshot, RuntimeOptions};
use once_cell::sync::OnceCell;
use uuid::Uuid;

use crate::types::{Result, SandboxError};
use crate::vm::hostcall::{jsbox_host, SharedIo};
use crate::vm::interrupt::InterruptHandle;
use crate::vm::snapshot::MachineSnapshot;

/// Guest environment installed by `load_runtime`: the handler table, the
/// dispatch entry point, the clock intrinsic backed by the current-time
/// host call, and console forwarding. Runs once per sandbox; the baseline
/// snapshot captures the result.
const BOOTSTRAP: &str = r#"
(() => {
  "use strict";
  const ops = Deno.core.ops;
  const handlers = Object.create(null);

  const hostNow = () => {
    const t = ops.op_jsbox_now();
    if (t === null) {
      throw new Error("host clock unavailable");
    }
    return t[0] * 1000 + Math.floor(t[1] / 1e6);
  };
  Date.now = hostNow;

  const toText = (args) => args.map((a) => {
    if (typeof a === "string") {
      return a;
    }
    try {
      return JSON.stringify(a);
    } catch (_) {
      return String(a);
    }
  }).join(" ");
  globalThis.console = {
    log: (...args) => ops.op_jsbox_log("info", toText(args)),
    info: (...args) => ops.op_jsbox_log("info", toText(args)),
    warn: (...args) => ops.op_jsbox_log("warn", toText(args)),
    error: (...args) => ops.op_jsbox_log("error", toText(args)),
    debug: (...args) => ops.op_jsbox_log("debug", toText(args)),
  };

  globalThis.__jsbox_register = (name, fn) => {
    handlers[name] = fn;
  };
  globalThis.__jsbox_dispatch = (name) => {
    const fn = handlers[name];
    if (fn === undefined) {
      throw new Error("no handler registered under '" + name + "'");
    }
    const event = JSON.parse(ops.op_jsbox_read_event());
    const result = fn(event);
    ops.op_jsbox_write_result(JSON.stringify(result === undefined ? null : result));
  };

  delete globalThis.eval;
  delete globalThis.Deno;
})();
"#;

/// Re-applied after every engine rebuild: the engine re-exposes its host
/// bindings on a fresh isolate even when state comes from a snapshot.
const HARDEN: &str = "delete globalThis.eval; delete globalThis.Deno;";

/// Guest stack size maps to a process-wide engine flag and is fixed at the
/// first machine build.
static STACK_SIZE: OnceCell<u64> = OnceCell::new();

fn apply_stack_size(stack_size: u64) {
    let applied = *STACK_SIZE.get_or_init(|| {
        let kib = (stack_size / 1024).max(64);
        v8::V8::set_flags_from_string(&format!("--stack-size={kib}"));
        stack_size
    });
    if applied != stack_size {
        log::warn!(
            "guest stack size is fixed at {applied} bytes for this process; ignoring {stack_size}"
        );
    }
}

/// State handed to the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates guest execution when the heap limit is near, instead of
/// letting the engine abort the host process. Grants 1 MiB of headroom so
/// the termination can unwind.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the Box<HeapLimitState> owned by the Machine
    // that registered this callback. The machine keeps the box alive until
    // after the isolate is dropped, and the engine only invokes the
    // callback while the isolate is alive. The shared reference is sound:
    // `triggered` is atomic, `handle` is a thread-safe handle.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

/// Build-time machine geometry. All values are validated by the builder.
#[derive(Debug, Clone)]
pub(crate) struct MachineConfig {
    pub heap_size: u64,
    pub stack_size: u64,
    pub input_buffer_size: usize,
    pub output_buffer_size: usize,
}

pub(crate) struct Machine {
    // Field order matters: the isolate must drop before the heap-limit
    // state and the snapshot bytes it references.
    runtime: Option<JsRuntimeForSnapshot>,
    heap_state: Option<Box<HeapLimitState>>,
    backing: Option<MachineSnapshot>,
    io: SharedIo,
    interrupt: InterruptHandle,
    config: MachineConfig,
    id: Uuid,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self> {
        apply_stack_size(config.stack_size);
        let io = SharedIo::new(config.input_buffer_size, config.output_buffer_size);
        let mut machine = Self {
            runtime: None,
            heap_state: None,
            backing: None,
            io,
            interrupt: InterruptHandle::new(),
            config,
            id: Uuid::new_v4(),
        };
        machine.install_engine(None)?;
        log::debug!("machine {} allocated", machine.id);
        Ok(machine)
    }

    /// Identity of this machine; snapshots carry it so they can only be
    /// applied back to their origin.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Build a fresh isolate, optionally seeded from a snapshot, and swap
    /// it in. The old isolate (if any) is dropped before the state backing
    /// it.
    fn install_engine(&mut self, backing: Option<MachineSnapshot>) -> Result<()> {
        let create_params =
            v8::CreateParams::default().heap_limits(0, self.config.heap_size as usize);
        let startup_snapshot: Option<&'static [u8]> = backing.as_ref().map(|snapshot| {
            // SAFETY: the isolate built over these bytes never outlives
            // them. `backing` is stored in `self.backing` below and field
            // order guarantees the isolate drops first, on rebuild and on
            // final drop alike.
            unsafe {
                std::slice::from_raw_parts(snapshot.bytes().as_ptr(), snapshot.bytes().len())
            }
        });

        let mut runtime = JsRuntimeForSnapshot::new(RuntimeOptions {
            extensions: vec![jsbox_host::init_ops()],
            startup_snapshot,
            create_params: Some(create_params),
            ..Default::default()
        });
        runtime.op_state().borrow_mut().put(self.io.clone());

        let isolate_handle = runtime.v8_isolate().thread_safe_handle();
        let heap_state = Box::new(HeapLimitState {
            handle: isolate_handle.clone(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
        );
        self.interrupt.retarget(isolate_handle);

        let from_snapshot = backing.is_some();
        self.runtime = Some(runtime);
        self.heap_state = Some(heap_state);
        self.backing = backing;

        if from_snapshot {
            self.enter_setup("jsbox:harden", HARDEN.to_string())?;
        }
        Ok(())
    }

    fn runtime_mut(&mut self) -> Result<&mut JsRuntimeForSnapshot> {
        self.runtime
            .as_mut()
            .ok_or_else(|| SandboxError::Internal("engine slot is empty".to_string()))
    }

    /// Enter the engine for setup work (bootstrap, handler compilation).
    /// Failures are internal errors; the call path is not involved.
    fn enter_setup(&mut self, tag: &'static str, code: String) -> Result<()> {
        self.runtime_mut()?
            .execute_script(tag, code)
            .map_err(|e| SandboxError::Internal(format!("guest setup failed: {e}")))?;
        Ok(())
    }

    /// Run the engine bootstrap. One-shot, called by `load_runtime`.
    pub fn bootstrap(&mut self) -> Result<()> {
        self.enter_setup("jsbox:bootstrap", BOOTSTRAP.to_string())
    }

    /// Compile one handler source inside the engine and register it in the
    /// guest handler table under `name`.
    pub fn compile_handler(&mut self, name: &str, source: &str) -> Result<()> {
        let name_json = encode_name(name)?;
        let script = [
            "(() => { \"use strict\";\n",
            source,
            "\n;if (typeof handler !== \"function\") { \
             throw new TypeError(\"handler source must declare a function named 'handler'\"); }\n\
             __jsbox_register(",
            &name_json,
            ", handler); })();",
        ]
        .concat();
        self.enter_setup("jsbox:handler", script)
    }

    /// Frame the event into the input buffer. Oversized events are an
    /// internal error; the guest is never entered.
    pub fn write_event(&mut self, event: &serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(event)
            .map_err(|e| SandboxError::Internal(format!("failed to encode event: {e}")))?;
        if !self.io.0.borrow_mut().input.write(&bytes) {
            return Err(SandboxError::Internal(format!(
                "encoded event of {} bytes exceeds the {}-byte input buffer",
                bytes.len(),
                self.config.input_buffer_size
            )));
        }
        Ok(())
    }

    /// Mark call entry: reset the output side of the buffers and clear any
    /// kill left pending from the quiescent period. Must run before a
    /// monitor task is spawned, or an early-firing monitor could be wiped
    /// out by its own call's entry.
    pub fn begin_entry(&mut self) {
        {
            let mut io = self.io.0.borrow_mut();
            io.output.clear();
            io.output_overflow = false;
        }
        self.interrupt.begin_call();
    }

    /// Enter the vCPU and run the named handler against the buffered
    /// event. `begin_entry` must have been called first.
    pub fn run_handler(&mut self, name: &str) -> Result<()> {
        let name_json = encode_name(name)?;
        let script = format!("__jsbox_dispatch({name_json});");

        let outcome = {
            let runtime = match self.runtime.as_mut() {
                Some(runtime) => runtime,
                None => {
                    self.interrupt.end_call();
                    return Err(SandboxError::Internal("engine slot is empty".to_string()));
                }
            };
            runtime.execute_script("jsbox:dispatch", script)
        };
        self.interrupt.end_call();

        match outcome {
            Ok(_) => {
                if self.io.0.borrow().output_overflow {
                    Err(SandboxError::GuestAbort(format!(
                        "handler result exceeds the {}-byte output buffer",
                        self.config.output_buffer_size
                    )))
                } else {
                    Ok(())
                }
            }
            Err(err) => Err(self.classify_exit(err)),
        }
    }

    /// Map a guest exit to the error taxonomy. Heap kills take priority
    /// over the interrupt flag: the heap callback terminates execution
    /// without anyone calling `kill`.
    fn classify_exit(&self, err: impl std::fmt::Display) -> SandboxError {
        let heap_killed = self
            .heap_state
            .as_ref()
            .map(|state| state.triggered.load(Ordering::SeqCst))
            .unwrap_or(false);
        if heap_killed {
            return SandboxError::GuestAbort("guest heap limit exceeded".to_string());
        }
        if self.interrupt.cancelled() {
            return SandboxError::Cancelled;
        }
        let message = err.to_string();
        if message.contains("Maximum call stack size exceeded") {
            return SandboxError::StackOverflow;
        }
        SandboxError::GuestAbort(message)
    }

    /// Decode the handler result out of the output buffer.
    pub fn read_result(&mut self) -> Result<serde_json::Value> {
        let payload = self
            .io
            .0
            .borrow_mut()
            .output
            .take()
            .ok_or_else(|| SandboxError::Internal("guest produced no result".to_string()))?;
        serde_json::from_slice(&payload)
            .map_err(|e| SandboxError::Internal(format!("failed to decode handler result: {e}")))
    }

    /// Ask the engine for a garbage-collection pass (an extra vCPU entry).
    pub fn collect_garbage(&mut self) -> Result<()> {
        self.runtime_mut()?.v8_isolate().low_memory_notification();
        Ok(())
    }

    /// Capture the complete engine state. The live engine is rebuilt from
    /// the captured bytes, so observable guest state is unchanged.
    pub fn snapshot(&mut self) -> Result<MachineSnapshot> {
        let runtime = self
            .runtime
            .take()
            .ok_or_else(|| SandboxError::Internal("engine slot is empty".to_string()))?;
        let bytes = runtime.snapshot();
        let snapshot = MachineSnapshot::new(bytes, self.id);
        self.install_engine(Some(snapshot.clone()))?;
        log::debug!(
            "machine {} snapshot taken ({} bytes)",
            self.id,
            snapshot.size_bytes()
        );
        Ok(snapshot)
    }

    /// Overwrite the engine state with a snapshot taken from this machine.
    pub fn restore(&mut self, snapshot: &MachineSnapshot) -> Result<()> {
        if snapshot.origin() != self.id {
            return Err(SandboxError::InvalidArg(
                "snapshot was taken from a different sandbox".to_string(),
            ));
        }
        self.install_engine(Some(snapshot.clone()))?;
        log::debug!("machine {} restored", self.id);
        Ok(())
    }
}

fn encode_name(name: &str) -> Result<String> {
    serde_json::to_string(name)
        .map_err(|e| SandboxError::Internal(format!("failed to encode handler name: {e}")))
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
