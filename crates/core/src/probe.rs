//! Readiness probing for launched applications.
//!
//! A probe repeatedly opens a TCP connection to the application's address
//! until one succeeds, the process exits, or the deadline passes. It never
//! signals the process: on failure the caller owns teardown.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::launcher::AppProcess;

/// Probe timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessProbe {
	pub interval: Duration,
	pub deadline: Duration,
	pub connect_timeout: Duration,
}

/// Bookkeeping for one probe run; dropped once the outcome is known.
#[derive(Debug, Clone)]
pub struct ReadinessState {
	pub attempts: u32,
	started: Instant,
	pub last_error: Option<String>,
}

impl ReadinessState {
	fn new() -> Self {
		Self {
			attempts: 0,
			started: Instant::now(),
			last_error: None,
		}
	}

	pub fn elapsed(&self) -> Duration {
		self.started.elapsed()
	}

	fn remaining(&self, deadline: Duration) -> Duration {
		deadline.saturating_sub(self.elapsed())
	}

	fn into_timeout(self, process: &AppProcess) -> Error {
		Error::ReadinessTimeout {
			addr: process.addr(),
			attempts: self.attempts,
			elapsed: self.elapsed(),
			last_error: self.last_error.unwrap_or_else(|| "no connection attempt completed".to_string()),
			stderr: process.stderr_text(),
		}
	}
}

impl ReadinessProbe {
	pub fn from_config(config: &HarnessConfig) -> Self {
		Self {
			interval: config.probe_interval,
			deadline: config.ready_timeout,
			connect_timeout: config.connect_timeout,
		}
	}

	/// Blocks the calling thread until `process` accepts a connection.
	pub fn wait(&self, process: &mut AppProcess) -> Result<ReadinessState> {
		let mut state = ReadinessState::new();
		loop {
			if let Some(status) = process.poll_exit() {
				return Err(process.exited_early(status));
			}

			state.attempts += 1;
			match self.connect_blocking(process) {
				Ok(addr) => return Ok(self.ready(process, state, addr)),
				Err(e) => self.record_failure(&mut state, e),
			}

			let remaining = state.remaining(self.deadline);
			if remaining.is_zero() {
				return Err(state.into_timeout(process));
			}
			std::thread::sleep(self.interval.min(remaining));
		}
	}

	/// Cooperative variant of [`ReadinessProbe::wait`]: yields at every connect and pause.
	pub async fn wait_async(&self, process: &mut AppProcess) -> Result<ReadinessState> {
		let mut state = ReadinessState::new();
		loop {
			if let Some(status) = process.poll_exit() {
				return Err(process.exited_early_async(status).await);
			}

			state.attempts += 1;
			match self.connect_async(process).await {
				Ok(addr) => return Ok(self.ready(process, state, addr)),
				Err(e) => self.record_failure(&mut state, e),
			}

			let remaining = state.remaining(self.deadline);
			if remaining.is_zero() {
				return Err(state.into_timeout(process));
			}
			tokio::time::sleep(self.interval.min(remaining)).await;
		}
	}

	fn connect_blocking(&self, process: &AppProcess) -> std::io::Result<SocketAddr> {
		let mut last_error = None;
		for addr in (process.host(), process.port()).to_socket_addrs()? {
			match TcpStream::connect_timeout(&addr, self.connect_timeout) {
				Ok(_) => return Ok(addr),
				Err(e) => last_error = Some(e),
			}
		}
		Err(last_error.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")))
	}

	async fn connect_async(&self, process: &AppProcess) -> std::io::Result<SocketAddr> {
		let connect = tokio::net::TcpStream::connect((process.host(), process.port()));
		match tokio::time::timeout(self.connect_timeout, connect).await {
			Ok(Ok(stream)) => stream.peer_addr(),
			Ok(Err(e)) => Err(e),
			Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")),
		}
	}

	fn record_failure(&self, state: &mut ReadinessState, error: std::io::Error) {
		trace!(target = "subproc.probe", attempt = state.attempts, error = %error, "not ready");
		state.last_error = Some(error.to_string());
	}

	fn ready(&self, process: &AppProcess, state: ReadinessState, addr: SocketAddr) -> ReadinessState {
		debug!(
			target = "subproc.probe",
			pid = process.pid(),
			%addr,
			attempts = state.attempts,
			elapsed = ?state.elapsed(),
			"application ready"
		);
		state
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use crate::launcher::launch;
	use crate::spec::LaunchSpec;

	fn sh(script: &str) -> LaunchSpec {
		LaunchSpec::new(std::env::temp_dir(), "sh").arg("-c").arg(script).without_addr_args()
	}

	fn probe(deadline: Duration) -> ReadinessProbe {
		ReadinessProbe {
			interval: Duration::from_millis(20),
			deadline,
			connect_timeout: Duration::from_millis(100),
		}
	}

	#[test]
	fn silent_process_times_out_with_attempt_count() {
		let mut process = launch(&sh("sleep 30"), &HarnessConfig::default()).unwrap();
		let started = Instant::now();

		let err = probe(Duration::from_millis(300)).wait(&mut process).unwrap_err();
		match &err {
			Error::ReadinessTimeout { attempts, last_error, .. } => {
				assert!(*attempts >= 2, "expected several attempts, got {attempts}");
				assert!(!last_error.is_empty());
			}
			other => panic!("unexpected error: {other}"),
		}
		assert!(started.elapsed() < Duration::from_secs(5), "probe must respect its deadline");
		assert!(process.is_running(), "the probe must not stop the process");
	}

	#[test]
	fn early_exit_fails_fast_with_stderr() {
		let mut process = launch(&sh("echo 'cannot load app' >&2; exit 1"), &HarnessConfig::default()).unwrap();
		let started = Instant::now();

		let err = probe(Duration::from_secs(10)).wait(&mut process).unwrap_err();
		assert!(matches!(err, Error::ProcessExitedEarly { .. }), "{err}");
		assert_eq!(err.stderr(), Some("cannot load app\n"));
		assert!(started.elapsed() < Duration::from_secs(5));
	}

	#[test]
	fn listening_address_is_ready() {
		let mut process = launch(&sh("sleep 30"), &HarnessConfig::default()).unwrap();
		let listener = std::net::TcpListener::bind((process.host(), process.port())).unwrap();

		let state = probe(Duration::from_secs(2)).wait(&mut process).unwrap();
		assert_eq!(state.attempts, 1);
		drop(listener);
	}

	#[tokio::test]
	async fn async_probe_times_out() {
		let mut process = launch(&sh("sleep 30"), &HarnessConfig::default()).unwrap();
		let err = probe(Duration::from_millis(200)).wait_async(&mut process).await.unwrap_err();
		assert!(matches!(err, Error::ReadinessTimeout { .. }), "{err}");
	}

	#[tokio::test(flavor = "current_thread")]
	async fn async_early_exit_fails_fast_with_stderr() {
		let mut process = launch(&sh("echo 'cannot load app' >&2; exit 1"), &HarnessConfig::default()).unwrap();
		let started = Instant::now();

		let err = probe(Duration::from_secs(10)).wait_async(&mut process).await.unwrap_err();
		assert!(matches!(err, Error::ProcessExitedEarly { .. }), "{err}");
		assert_eq!(err.stderr(), Some("cannot load app\n"));
		assert!(started.elapsed() < Duration::from_secs(5));
	}

	#[tokio::test]
	async fn async_probe_sees_late_listener() {
		let mut process = launch(&sh("sleep 30"), &HarnessConfig::default()).unwrap();
		let addr = (process.host().to_string(), process.port());

		let bind_later = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(150)).await;
			tokio::net::TcpListener::bind(addr).await.unwrap()
		});

		let state = probe(Duration::from_secs(5)).wait_async(&mut process).await.unwrap();
		assert!(state.attempts > 1);
		drop(bind_later.await.unwrap());
	}
}
