//! Test-fixture worker binary, shipped alongside the crate for its own integration tests and as a
//! runnable demonstration of the worker side of the protocol.
//!
//! Registers the handful of callables the integration tests and `procpool-cli` exercise: plain
//! echo, a sleep for racing scenarios, a recoverable user error, two ways to die (abort/exit), a
//! pid lookup and a peer-kill used to simulate cross-worker kill races, and a deliberate encode
//! failure.

use procpool::{CallableOutcome, CallableRegistry};
use serde_json::{json, Value};

fn main() -> std::io::Result<()> {
    let mut registry = CallableRegistry::new();

    registry.register("echo", |args: Value| CallableOutcome::Ok(args));

    registry.register("sleep_then_return", |args: Value| {
        let seconds = args.get("seconds").and_then(Value::as_f64).unwrap_or(0.0);
        std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        CallableOutcome::Ok(value)
    });

    registry.register("raise_error", |args: Value| {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("bad except")
            .to_string();
        CallableOutcome::UserError(message)
    });

    registry.register("segfault", |_args: Value| {
        std::process::abort();
    });

    registry.register("get_pid", |_args: Value| {
        CallableOutcome::Ok(json!(std::process::id()))
    });

    registry.register("exit_nonzero", |_args: Value| {
        std::process::exit(1);
    });

    registry.register("kill_friend", |args: Value| {
        let pid = args.get("pid").and_then(Value::as_i64).unwrap_or(0) as libc::pid_t;
        let delay_ms = args.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        if delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
        }
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        CallableOutcome::Ok(json!(true))
    });

    registry.register("encode_failure", |_args: Value| {
        CallableOutcome::EncodeFailure("deliberately unencodable result".to_string())
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(procpool::worker::run(registry))
}
