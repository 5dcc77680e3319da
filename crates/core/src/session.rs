//! Scoped sessions: a launched, ready application plus a client bound to it.
//!
//! A [`Session`] is torn down exactly once, either explicitly through
//! [`Session::teardown`] or when it is dropped. Teardown order is fixed:
//! terminate the process, close the client, then drain captured output.

use std::process::ExitStatus;

use tracing::{info, warn};

use crate::client::{AsyncClient, BlockingClient, ClientHandle, TransportMode, build_client};
use crate::config::HarnessConfig;
use crate::error::{Error, Result, TeardownWarning};
use crate::launcher::{AppProcess, launch};
use crate::probe::{ReadinessProbe, ReadinessState};
use crate::spec::LaunchSpec;

/// What happened while tearing a session down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
	pub exit_status: Option<ExitStatus>,
	pub warnings: Vec<TeardownWarning>,
	pub discarded_bytes: usize,
}

impl TeardownReport {
	/// `true` when the process stopped on SIGTERM and nothing needed forcing.
	pub fn is_clean(&self) -> bool {
		self.warnings.is_empty()
	}
}

/// A running application and the client used to talk to it.
pub struct Session {
	spec: LaunchSpec,
	config: HarnessConfig,
	base_url: String,
	process: AppProcess,
	client: Option<ClientHandle>,
	report: Option<TeardownReport>,
}

impl Session {
	/// Launches `spec`, blocks until it accepts connections, then builds a `mode` client.
	///
	/// A [`TransportMode::Blocking`] session must not be opened or dropped on a
	/// tokio worker; use [`Session::open_async`] there.
	pub fn open(spec: LaunchSpec, mode: TransportMode, config: &HarnessConfig) -> Result<Self> {
		let mut process = launch(&spec, config)?;
		let readiness = ReadinessProbe::from_config(config).wait(&mut process)?;
		Self::ready(spec, config, process, mode, readiness)
	}

	/// Launches `spec` and probes it cooperatively, yielding a non-blocking client.
	pub async fn open_async(spec: LaunchSpec, config: &HarnessConfig) -> Result<Self> {
		let mut process = launch(&spec, config)?;
		let readiness = ReadinessProbe::from_config(config).wait_async(&mut process).await?;
		Self::ready(spec, config, process, TransportMode::NonBlocking, readiness)
	}

	fn ready(spec: LaunchSpec, config: &HarnessConfig, process: AppProcess, mode: TransportMode, readiness: ReadinessState) -> Result<Self> {
		let base_url = process.base_url();
		let client = build_client(&base_url, mode, config)?;

		info!(
			target = "subproc.session",
			pid = process.pid(),
			%base_url,
			%mode,
			attempts = readiness.attempts,
			elapsed = ?readiness.elapsed(),
			"session ready"
		);

		Ok(Self {
			spec,
			config: config.clone(),
			base_url,
			process,
			client: Some(client),
			report: None,
		})
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	pub fn pid(&self) -> u32 {
		self.process.pid()
	}

	pub fn port(&self) -> u16 {
		self.process.port()
	}

	pub fn spec(&self) -> &LaunchSpec {
		&self.spec
	}

	pub fn config(&self) -> &HarnessConfig {
		&self.config
	}

	pub fn client(&self) -> Option<&ClientHandle> {
		self.client.as_ref()
	}

	pub fn blocking_client(&self) -> Result<&BlockingClient> {
		self.client
			.as_ref()
			.and_then(ClientHandle::as_blocking)
			.ok_or(Error::TransportMismatch {
				expected: TransportMode::Blocking,
			})
	}

	pub fn async_client(&self) -> Result<&AsyncClient> {
		self.client
			.as_ref()
			.and_then(ClientHandle::as_async)
			.ok_or(Error::TransportMismatch {
				expected: TransportMode::NonBlocking,
			})
	}

	/// Takes the client out of the session; teardown then records it as already closed.
	pub fn take_client(&mut self) -> Option<ClientHandle> {
		self.client.take()
	}

	pub fn stdout_text(&self) -> String {
		self.process.stdout_text()
	}

	pub fn stderr_text(&self) -> String {
		self.process.stderr_text()
	}

	/// The stored report once the session has been torn down.
	pub fn report(&self) -> Option<&TeardownReport> {
		self.report.as_ref()
	}

	/// Stops the application and releases everything the session holds.
	///
	/// Repeated calls return the first report and do nothing else.
	pub fn teardown(&mut self) -> &TeardownReport {
		if self.report.is_none() {
			let report = self.run_teardown();
			self.report = Some(report);
		}
		self.report.get_or_insert_with(TeardownReport::default)
	}

	fn run_teardown(&mut self) -> TeardownReport {
		let mut report = TeardownReport::default();
		let pid = self.process.pid();

		match self.process.terminate(self.config.grace_period) {
			Ok(status) => report.exit_status = Some(status),
			Err(warning) => {
				report.exit_status = self.process.poll_exit();
				report.warnings.push(warning);
			}
		}

		if self.client.take().is_none() {
			report.warnings.push(TeardownWarning::ClientAlreadyClosed);
		}

		let drained = self.process.drain_output();
		report.discarded_bytes = drained.discarded_bytes;
		report
			.warnings
			.extend(drained.detached.into_iter().map(|stream| TeardownWarning::CaptureDetached { stream }));

		for warning in &report.warnings {
			warn!(target = "subproc.session", pid, %warning, "teardown");
		}
		info!(
			target = "subproc.session",
			pid,
			status = ?report.exit_status,
			discarded_bytes = report.discarded_bytes,
			"session torn down"
		);
		report
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.teardown();
	}
}

/// Runs `body` against a blocking client for a freshly launched application.
///
/// The application is torn down before this returns, also when `body` panics.
pub fn with_blocking_client<F, T>(spec: LaunchSpec, config: &HarnessConfig, body: F) -> Result<T>
where
	F: FnOnce(&BlockingClient) -> T,
{
	let mut session = Session::open(spec, TransportMode::Blocking, config)?;
	let output = body(session.blocking_client()?);
	session.teardown();
	Ok(output)
}

/// Runs `body` against a non-blocking client for a freshly launched application.
///
/// The application is torn down before this resolves, also when `body` panics.
pub async fn with_async_client<F, T>(spec: LaunchSpec, config: &HarnessConfig, body: F) -> Result<T>
where
	F: AsyncFnOnce(&AsyncClient) -> T,
{
	let mut session = Session::open_async(spec, config).await?;
	let output = body(session.async_client()?).await;
	session.teardown();
	Ok(output)
}
