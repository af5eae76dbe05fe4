//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use jsbox::{LoadedSandbox, Result, SandboxBuilder};

pub const ECHO: &str = "function handler(event) { return event; }";

pub const COUNTER: &str = r#"
let count = 0;
function handler(event) {
    count += 1;
    return { count: count };
}
"#;

/// Burns CPU until `event.ms` of wall time has passed.
pub const BUSY_LOOP: &str = r#"
function handler(event) {
    const deadline = Date.now() + event.ms;
    while (Date.now() < deadline) {}
    return "done";
}
"#;

pub const CALCULATOR: &str = r#"
function handler(event) {
    if (event.operation === "divide" && event.b === 0) {
        event.result = "Error: Division by zero";
        return event;
    }
    switch (event.operation) {
        case "add": event.result = event.a + event.b; break;
        case "subtract": event.result = event.a - event.b; break;
        case "multiply": event.result = event.a * event.b; break;
        case "divide": event.result = event.a / event.b; break;
        default: event.result = "Error: Unknown operation";
    }
    return event;
}
"#;

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Build a sandbox with a single handler, through the full stage chain.
pub fn loaded_with(name: &str, source: &str) -> Result<LoadedSandbox> {
    let mut runtime = SandboxBuilder::new().build()?.load_runtime()?;
    runtime.add_handler(name, source)?;
    runtime.load_handlers()
}
