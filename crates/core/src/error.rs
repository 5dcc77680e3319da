//! Error types for the subprocess harness.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::client::TransportMode;

pub type Result<T> = std::result::Result<T, Error>;

/// Lifecycle phase in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Launch,
	Readiness,
	Transport,
	Publish,
}

impl std::fmt::Display for Phase {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Phase::Launch => write!(f, "launch"),
			Phase::Readiness => write!(f, "readiness"),
			Phase::Transport => write!(f, "transport"),
			Phase::Publish => write!(f, "publish"),
		}
	}
}

#[derive(Debug, Error)]
pub enum Error {
	/// The application process could not be spawned.
	#[error("failed to launch {program}: {reason}")]
	LaunchFailure { program: PathBuf, reason: String },

	/// The process spawned but never accepted connections before the deadline.
	#[error("{addr} not reachable after {attempts} attempts in {elapsed:?}: {last_error}{}", diagnostics(.stderr))]
	ReadinessTimeout {
		addr: String,
		attempts: u32,
		elapsed: Duration,
		last_error: String,
		stderr: String,
	},

	/// The process terminated before it became reachable.
	#[error("process exited before becoming ready ({status}){}", diagnostics(.stderr))]
	ProcessExitedEarly { status: ExitStatus, stderr: String },

	#[error("invalid base URL {url}: {reason}")]
	InvalidBaseUrl { url: String, reason: String },

	#[error("failed to build HTTP client: {0}")]
	ClientBuild(#[source] reqwest::Error),

	#[error("request to {url} failed: {source}")]
	Transport {
		url: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("reading stream from {url} failed: {source}")]
	StreamRead {
		url: String,
		#[source]
		source: std::io::Error,
	},

	#[error("malformed event from {url}: {reason}")]
	MalformedEvent { url: String, reason: String },

	#[error("{url} answered {status}")]
	UnexpectedStatus { url: String, status: reqwest::StatusCode },

	#[error("{url} is not an event stream (content-type: {content_type})")]
	NotEventStream { url: String, content_type: String },

	#[error("event stream from {url} ended before an event arrived")]
	StreamClosed { url: String },

	#[error("session was opened without a {expected} client")]
	TransportMismatch { expected: TransportMode },

	#[error("publishing to {topic} failed: {reason}")]
	Publish { topic: String, reason: String },
}

impl Error {
	/// Returns the lifecycle phase this error belongs to.
	pub fn phase(&self) -> Phase {
		match self {
			Error::LaunchFailure { .. } => Phase::Launch,
			Error::ReadinessTimeout { .. } | Error::ProcessExitedEarly { .. } => Phase::Readiness,
			Error::InvalidBaseUrl { .. }
			| Error::ClientBuild(_)
			| Error::Transport { .. }
			| Error::StreamRead { .. }
			| Error::MalformedEvent { .. }
			| Error::UnexpectedStatus { .. }
			| Error::NotEventStream { .. }
			| Error::StreamClosed { .. }
			| Error::TransportMismatch { .. } => Phase::Transport,
			Error::Publish { .. } => Phase::Publish,
		}
	}

	/// Returns captured stderr attached to launch/readiness failures.
	pub fn stderr(&self) -> Option<&str> {
		match self {
			Error::ReadinessTimeout { stderr, .. } | Error::ProcessExitedEarly { stderr, .. } => Some(stderr.as_str()),
			_ => None,
		}
	}

	pub(crate) fn launch(program: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
		Error::LaunchFailure {
			program: program.into(),
			reason: reason.into(),
		}
	}
}

fn diagnostics(stderr: &str) -> String {
	let trimmed = stderr.trim_end();
	if trimmed.is_empty() { String::new() } else { format!("\n--- captured stderr ---\n{trimmed}") }
}

/// Non-fatal conditions met while tearing a session down.
///
/// These are logged and recorded in the teardown report, never returned as errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeardownWarning {
	#[error("process {pid} had already exited ({status})")]
	AlreadyExited { pid: u32, status: String },

	#[error("process {pid} ignored SIGTERM for {grace:?}; killed")]
	ForcedKill { pid: u32, grace: Duration },

	#[error("signalling process {pid} failed: {reason}")]
	SignalFailed { pid: u32, reason: String },

	#[error("client was already closed")]
	ClientAlreadyClosed,

	#[error("{stream} capture did not reach end of file; detached")]
	CaptureDetached { stream: &'static str },
}
