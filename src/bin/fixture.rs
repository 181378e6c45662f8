//! Worker binary driven by the integration tests.
//!
//! Tasks:
//! - `echo`: returns its arguments.
//! - `initial`: returns the data payload pushed after the handshake.
//! - `sleep`: waits `args.ms` milliseconds, then echoes.
//! - `slow`: never replies.
//! - `fail`: replies with an error.
//! - `panic`: panics inside the handler.
//! - `crash`: exits the process with `args.code`.
//!
//! Started with a lineage beginning with `impostor-`, the fixture answers the
//! handshake with a different id.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use forkvisor::{WireError, WorkerRuntime};
use serde_json::{Value, json};

const IMPOSTOR: &str = "impostor-";

#[tokio::main]
async fn main() {
    let impostor = std::env::args().nth(1).filter(|lineage| lineage.starts_with(IMPOSTOR));
    let runtime = match impostor {
        Some(lineage) => Ok(WorkerRuntime::with_io(format!("not-{lineage}"), tokio::io::stdin(), tokio::io::stdout())),
        None => WorkerRuntime::from_args(),
    };
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("forkvisor-fixture: {e}");
            std::process::exit(2);
        }
    };
    let reporter = runtime.reporter();
    let initial = Arc::new(Mutex::new(Value::Null));

    runtime.register("echo", |args| async move { anyhow::Ok(args) });
    runtime.register("sleep", |args: Value| async move {
        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        anyhow::Ok(args)
    });
    runtime.register("slow", |_args| std::future::pending::<anyhow::Result<Value>>());
    runtime.register("fail", |args: Value| async move {
        Err::<Value, _>(anyhow::Error::new(WireError::new("FixtureError", format!("asked to fail with {args}"))))
    });
    runtime.register("panic", |args: Value| async move {
        let message = args.as_str().unwrap_or("fixture panic").to_owned();
        if !message.is_empty() {
            panic!("{message}");
        }
        anyhow::Ok(Value::Null)
    });
    runtime.register("crash", |args: Value| async move {
        let code = args.get("code").and_then(Value::as_i64).and_then(|c| i32::try_from(c).ok()).unwrap_or(1);
        if code != 0 {
            std::process::exit(code);
        }
        Err::<Value, _>(anyhow::anyhow!("crash needs a non-zero code"))
    });

    let seen = Arc::clone(&initial);
    runtime.register("initial", move |_args| {
        let seen = Arc::clone(&seen);
        async move { anyhow::Ok(seen.lock().unwrap_or_else(PoisonError::into_inner).clone()) }
    });

    let connected = runtime.connect(
        move |data: Value| {
            let store = Arc::clone(&initial);
            let reporter = reporter.clone();
            async move {
                *store.lock().unwrap_or_else(PoisonError::into_inner) = data;
                reporter.info("ready");
                anyhow::Ok(Value::Null)
            }
        },
        |description: Value| async move {
            anyhow::Ok(json!({
                "pid": std::process::id(),
                "description": description,
            }))
        },
    );
    if let Err(e) = connected {
        eprintln!("forkvisor-fixture: {e}");
        std::process::exit(2);
    }

    match runtime.run().await {
        Ok(exit) => std::process::exit(exit.code()),
        Err(e) => {
            eprintln!("forkvisor-fixture: {e}");
            std::process::exit(1);
        }
    }
}
