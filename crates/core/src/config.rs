//! Harness timing and capture configuration.

use std::time::Duration;

use tracing::warn;

/// Tunables shared by the launcher, prober, client factory and teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
	/// Pause between readiness attempts.
	pub probe_interval: Duration,
	/// Total time allowed for the process to accept connections.
	pub ready_timeout: Duration,
	/// Per-attempt TCP connect timeout, also used by the HTTP clients.
	pub connect_timeout: Duration,
	/// Time between SIGTERM and SIGKILL during teardown.
	pub grace_period: Duration,
	/// Whole-request bound for client calls, streams included. `None` disables it.
	pub request_timeout: Option<Duration>,
	/// Bytes of stdout/stderr retained per stream (oldest bytes are dropped).
	pub capture_limit: usize,
}

impl Default for HarnessConfig {
	fn default() -> Self {
		Self {
			probe_interval: Duration::from_millis(50),
			ready_timeout: Duration::from_secs(10),
			connect_timeout: Duration::from_millis(250),
			grace_period: Duration::from_secs(5),
			request_timeout: Some(Duration::from_secs(30)),
			capture_limit: 64 * 1024,
		}
	}
}

impl HarnessConfig {
	/// Defaults overridden by `SUBPROC_*` environment variables.
	pub fn from_env() -> Self {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
		let mut config = Self::default();

		if let Some(value) = millis(&lookup, "SUBPROC_PROBE_INTERVAL_MS") {
			config.probe_interval = value;
		}
		if let Some(value) = millis(&lookup, "SUBPROC_READY_TIMEOUT_MS") {
			config.ready_timeout = value;
		}
		if let Some(value) = millis(&lookup, "SUBPROC_CONNECT_TIMEOUT_MS") {
			config.connect_timeout = value;
		}
		if let Some(value) = millis(&lookup, "SUBPROC_GRACE_PERIOD_MS") {
			config.grace_period = value;
		}
		if let Some(value) = millis(&lookup, "SUBPROC_REQUEST_TIMEOUT_MS") {
			config.request_timeout = (!value.is_zero()).then_some(value);
		}
		if let Some(value) = parse::<usize>(&lookup, "SUBPROC_CAPTURE_LIMIT") {
			config.capture_limit = value;
		}

		config
	}

	pub fn with_probe_interval(mut self, interval: Duration) -> Self {
		self.probe_interval = interval;
		self
	}

	pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
		self.ready_timeout = timeout;
		self
	}

	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn with_grace_period(mut self, grace: Duration) -> Self {
		self.grace_period = grace;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn with_capture_limit(mut self, bytes: usize) -> Self {
		self.capture_limit = bytes;
		self
	}
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
	parse::<u64>(lookup, key).map(Duration::from_millis)
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
	let raw = lookup(key)?;
	match raw.trim().parse() {
		Ok(value) => Some(value),
		Err(_) => {
			warn!(target = "subproc.config", key, value = %raw, "ignoring unparsable override");
			None
		}
	}
}
