//! Shared test tooling for the svnode crates: tracing setup, error reports,
//! loopback timeouts and wire vectors.
#![warn(missing_docs)]
#![deny(clippy::await_holding_lock)]
#![forbid(unsafe_code)]

use color_eyre::section::PanicMessage;
use owo_colors::OwoColorize;
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use std::{collections::HashSet, sync::Once, time::Duration};

pub mod prelude;
pub mod vectors;

/// How long loopback tests wait for a condition before failing.
///
/// Loopback round trips take milliseconds, this only matters on a stalled CI machine.
pub const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default filter when `RUST_LOG` is unset.
///
/// Closed and rejected connections are expected in the loopback tests, so the
/// network crate only reports errors.
const DEFAULT_FILTER: &str = "warn,svnode_network=error";

/// Backtrace frames from the runtime and the test harness, hidden from reports.
const HIDDEN_FRAMES: &[&str] = &[
    "tokio::",
    "std::panic",
    "std::thread::local",
    "std::sys",
    "core::ops::function::",
    "core::result::Result",
    "<alloc::boxed::Box",
    "<std::panic::AssertUnwindSafe",
    "test::run_test",
    "test::assert_test_result",
];

static INIT: Once = Once::new();

/// Install the tracing subscriber and the `color_eyre` hooks, once per test binary.
///
/// Tests run on several threads, later calls return immediately.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
            .expect("the default filter is valid");

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .with(ErrorLayer::default())
            .init();

        color_eyre::config::HookBuilder::default()
            .add_frame_filter(Box::new(|frames| {
                let mut seen = HashSet::new();
                frames.retain(|frame| {
                    if !seen.insert((frame.lineno, frame.filename.clone())) {
                        return false;
                    }
                    match frame.name.as_deref() {
                        Some(name) => !HIDDEN_FRAMES.iter().any(|hidden| name.starts_with(hidden)),
                        None => true,
                    }
                });
            }))
            .panic_message(TestPanicMessage)
            .install()
            .expect("color_eyre hooks are only installed once");
    })
}

/// Panic output that stays quiet for tests returning `Err`.
///
/// The harness has already printed the error report in that case.
struct TestPanicMessage;

impl PanicMessage for TestPanicMessage {
    fn display(
        &self,
        info: &std::panic::PanicInfo<'_>,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let payload = info
            .payload()
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("<non string panic payload>");

        if payload.contains("the test returned a termination value with a non-zero status code") {
            return write!(f, "---- end of test output ----");
        }

        writeln!(f, "{}", "\nTest panicked.".red())?;
        writeln!(f, "Message:  {}", payload.cyan())?;
        match info.location() {
            Some(loc) => write!(f, "Location: {}:{}", loc.file().purple(), loc.line().purple()),
            None => write!(f, "Location: <unknown>"),
        }
    }
}
