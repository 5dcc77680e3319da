//! Test harness for HTTP applications run as child processes.
//!
//! The harness launches the application from a [`LaunchSpec`], waits until
//! it accepts connections, and hands out a blocking or non-blocking client
//! bound to its address. A [`Session`] ties the three together and always
//! tears the process down, also when the test body panics.
//!
//! ```ignore
//! let spec = LaunchSpec::new(env!("CARGO_MANIFEST_DIR"), "target/debug/my-app");
//! let status = with_blocking_client(spec, &HarnessConfig::from_env(), |client| {
//!     client.get("/health").send().map(|r| r.status())
//! })??;
//! ```
//!
//! For server-sent events, [`streaming`] provides the stop signal, producer
//! loop and first-frame consumers used to verify that a message published to
//! a backend reaches a subscribed client.

mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod launcher;
pub mod probe;
pub mod session;
pub mod spec;
pub mod stream;
pub mod streaming;

pub use client::{AsyncClient, BlockingClient, ClientHandle, TransportMode, build_client};
pub use config::HarnessConfig;
pub use error::{Error, Phase, Result, TeardownWarning};
pub use launcher::{AppProcess, DrainSummary, launch};
pub use probe::{ReadinessProbe, ReadinessState};
pub use session::{Session, TeardownReport, with_async_client, with_blocking_client};
pub use spec::{DEFAULT_HOST, LaunchSpec};
pub use stream::{BlockingEvents, EventStream};
pub use streaming::{Publisher, StopGuard, StopSignal, consume_first, consume_first_blocking, run_producer};
pub use subproc_protocol::{DEFAULT_EVENT_TYPE, SseEvent};
