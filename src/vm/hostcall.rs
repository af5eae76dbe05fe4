//! The host-call surface: the narrow channel the guest uses to reach the
//! host.
//!
//! The guest sees four calls (current-time, read-event, write-result, and
//! log), registered as engine ops so they survive snapshot and restore.
//! Event and result bytes move through fixed-size, length-prefixed buffers
//! sized at build time; everything else stays inside the guest heap.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use deno_core::{op2, OpState};

/// A fixed-capacity guest I/O buffer holding one length-prefixed payload.
///
/// Framing is a u32 little-endian byte length followed by UTF-8 JSON.
#[derive(Debug)]
pub(crate) struct FramedBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl FramedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    /// Frame `payload` into the buffer, replacing any previous content.
    /// Returns `false` when the framed payload exceeds the capacity.
    pub fn write(&mut self, payload: &[u8]) -> bool {
        if payload.len().saturating_add(4) > self.capacity || payload.len() > u32::MAX as usize {
            return false;
        }
        self.data.clear();
        self.data
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.data.extend_from_slice(payload);
        true
    }

    /// Take the framed payload out of the buffer, leaving it empty.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.data.len() < 4 {
            return None;
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&self.data[..4]);
        let len = u32::from_le_bytes(prefix) as usize;
        if self.data.len() < 4 + len {
            return None;
        }
        let payload = self.data[4..4 + len].to_vec();
        self.data.clear();
        Some(payload)
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

/// The guest-facing side of the event I/O buffers, shared between the
/// machine and the engine's op state.
#[derive(Debug)]
pub(crate) struct IoBuffers {
    pub input: FramedBuffer,
    pub output: FramedBuffer,
    /// Set when the guest wrote a result larger than the output buffer.
    pub output_overflow: bool,
}

impl IoBuffers {
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        Self {
            input: FramedBuffer::new(input_capacity),
            output: FramedBuffer::new(output_capacity),
            output_overflow: false,
        }
    }
}

/// Handle stored in the engine's `OpState`; the machine keeps a clone so
/// the buffers survive engine rebuilds on snapshot and restore.
#[derive(Clone)]
pub(crate) struct SharedIo(pub Rc<RefCell<IoBuffers>>);

impl SharedIo {
    pub fn new(input_capacity: usize, output_capacity: usize) -> Self {
        Self(Rc::new(RefCell::new(IoBuffers::new(
            input_capacity,
            output_capacity,
        ))))
    }
}

/// Current host time as (seconds since epoch, sub-second nanoseconds).
///
/// Backs the guest clock intrinsic. Returns `None` when the host clock is
/// unreadable; the guest bootstrap turns that into an abort.
#[op2]
#[serde]
pub fn op_jsbox_now() -> Option<(u64, u32)> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| (d.as_secs(), d.subsec_nanos()))
}

/// Read the pending event out of the input buffer.
#[op2]
#[string]
pub fn op_jsbox_read_event(state: &mut OpState) -> String {
    let payload = state
        .try_borrow::<SharedIo>()
        .and_then(|io| io.0.borrow_mut().input.take());
    match payload {
        Some(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| "null".to_string()),
        None => "null".to_string(),
    }
}

/// Write the handler result into the output buffer.
#[op2(fast)]
pub fn op_jsbox_write_result(state: &mut OpState, #[string] result: String) {
    if let Some(io) = state.try_borrow::<SharedIo>() {
        let mut io = io.0.borrow_mut();
        if !io.output.write(result.as_bytes()) {
            io.output_overflow = true;
        }
    }
}

/// Guest console output, forwarded to the host log under the `guest` target.
#[op2(fast)]
pub fn op_jsbox_log(#[string] level: String, #[string] message: String) {
    match level.as_str() {
        "error" => log::error!(target: "guest", "{message}"),
        "warn" => log::warn!(target: "guest", "{message}"),
        "debug" => log::debug!(target: "guest", "{message}"),
        _ => log::info!(target: "guest", "{message}"),
    }
}

deno_core::extension!(
    jsbox_host,
    ops = [
        op_jsbox_now,
        op_jsbox_read_event,
        op_jsbox_write_result,
        op_jsbox_log
    ],
);
