//! Application process launch and termination.
//!
//! The launcher only spawns: it never waits for the application to accept
//! connections (see [`crate::probe`]). The returned [`AppProcess`] owns the
//! child exclusively and is the only thing allowed to signal it.

use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use subproc_runtime::process::{free_port, port_available_on, signal_kill, signal_terminate};
use tracing::{debug, info, warn};

use crate::capture::OutputCapture;
use crate::config::HarnessConfig;
use crate::error::{Error, Result, TeardownWarning};
use crate::spec::LaunchSpec;

const EXIT_POLL: Duration = Duration::from_millis(10);
const CAPTURE_SETTLE: Duration = Duration::from_millis(500);

/// Spawns the application described by `spec`.
pub fn launch(spec: &LaunchSpec, config: &HarnessConfig) -> Result<AppProcess> {
	let workdir = spec.workdir();
	if !workdir.is_dir() {
		return Err(Error::launch(
			spec.program(),
			format!("working directory {} is not a directory", workdir.display()),
		));
	}

	let program = spec.resolve_program().map_err(|reason| Error::launch(spec.program(), reason))?;

	let host = spec.bind_host().to_string();
	let port = match spec.fixed_port() {
		Some(port) => {
			if !port_available_on(&host, port) {
				return Err(Error::launch(&program, format!("port {port} on {host} is already bound by another listener")));
			}
			port
		}
		None => free_port(&host).map_err(|e| Error::launch(&program, format!("no free port on {host}: {e}")))?,
	};

	let mut cmd = Command::new(&program);
	cmd.args(spec.command_args(port))
		.current_dir(workdir)
		.env("HOST", &host)
		.env("PORT", port.to_string())
		.envs(spec.env_overrides().iter().map(|(k, v)| (k, v)))
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped());

	#[cfg(unix)]
	std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

	let mut child = cmd
		.spawn()
		.map_err(|e| Error::launch(&program, format!("spawn failed: {e}")))?;

	let (stdout, stderr) = match capture_pipes(&mut child, config.capture_limit) {
		Ok(captures) => captures,
		Err(e) => return Err(abandon(child, &program, format!("output capture failed: {e}"))),
	};

	let pid = child.id();
	info!(
		target = "subproc.launch",
		pid,
		program = %program.display(),
		%host,
		port,
		"application launched"
	);

	Ok(AppProcess {
		child,
		pid,
		host,
		port,
		stdout,
		stderr,
		grace_period: config.grace_period,
		exit_status: None,
		terminated: false,
		drained: false,
	})
}

fn capture_pipes(child: &mut Child, limit: usize) -> io::Result<(OutputCapture, OutputCapture)> {
	let stdout = match child.stdout.take() {
		Some(pipe) => OutputCapture::spawn("stdout", pipe, limit)?,
		None => OutputCapture::empty("stdout"),
	};
	let stderr = match child.stderr.take() {
		Some(pipe) => OutputCapture::spawn("stderr", pipe, limit)?,
		None => OutputCapture::empty("stderr"),
	};
	Ok((stdout, stderr))
}

/// Kills a child that was spawned but cannot be handed out.
fn abandon(mut child: Child, program: &Path, reason: String) -> Error {
	let pid = child.id();
	if signal_kill(pid).is_err() {
		let _ = child.kill();
	}
	if let Err(e) = child.wait() {
		debug!(target = "subproc.launch", pid, error = %e, "wait after abandoning launch failed");
	}
	warn!(target = "subproc.launch", pid, %reason, "launch abandoned; process killed");
	Error::launch(program, reason)
}

/// `host:port` form suitable for connecting, with IPv6 hosts bracketed.
pub(crate) fn format_addr(host: &str, port: u16) -> String {
	if host.contains(':') { format!("[{host}]:{port}") } else { format!("{host}:{port}") }
}

/// Handle to a launched application process.
pub struct AppProcess {
	child: Child,
	pid: u32,
	host: String,
	port: u16,
	stdout: OutputCapture,
	stderr: OutputCapture,
	grace_period: Duration,
	exit_status: Option<ExitStatus>,
	terminated: bool,
	drained: bool,
}

impl AppProcess {
	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// `host:port` form suitable for connecting, with IPv6 hosts bracketed.
	pub fn addr(&self) -> String {
		format_addr(&self.host, self.port)
	}

	/// Base URL the application serves on.
	pub fn base_url(&self) -> String {
		format!("http://{}", self.addr())
	}

	pub fn stdout_text(&self) -> String {
		self.stdout.text()
	}

	pub fn stderr_text(&self) -> String {
		self.stderr.text()
	}

	/// Returns `true` while the process has not been observed exiting.
	pub fn is_running(&mut self) -> bool {
		self.poll_exit().is_none()
	}

	/// Non-blocking check for process exit; the status is cached once observed.
	pub fn poll_exit(&mut self) -> Option<ExitStatus> {
		if self.exit_status.is_none() {
			match self.child.try_wait() {
				Ok(status) => self.exit_status = status,
				Err(e) => debug!(target = "subproc.launch", pid = self.pid, error = %e, "try_wait failed"),
			}
		}
		self.exit_status
	}

	/// Builds the early-exit error once the stderr reader has seen end of file.
	///
	/// Whatever the leader left running in its group is killed first.
	pub(crate) fn exited_early(&mut self, status: ExitStatus) -> Error {
		self.reap_group();
		self.stderr.finish(CAPTURE_SETTLE);
		self.early_exit_error(status)
	}

	/// [`Self::exited_early`] for async callers; waits on the stderr reader without blocking the runtime.
	pub(crate) async fn exited_early_async(&mut self, status: ExitStatus) -> Error {
		self.reap_group();
		self.stderr.finish_async(CAPTURE_SETTLE).await;
		self.early_exit_error(status)
	}

	fn early_exit_error(&self, status: ExitStatus) -> Error {
		Error::ProcessExitedEarly {
			status,
			stderr: self.stderr.text(),
		}
	}

	/// Terminates the process: SIGTERM to its group, then SIGKILL once `grace` elapses.
	///
	/// Calling this on a process that already exited (or was already
	/// terminated) returns [`TeardownWarning::AlreadyExited`]. The group is
	/// still killed, so children that outlived the leader do not leak.
	pub fn terminate(&mut self, grace: Duration) -> std::result::Result<ExitStatus, TeardownWarning> {
		if let Some(status) = self.poll_exit() {
			self.terminated = true;
			self.reap_group();
			return Err(TeardownWarning::AlreadyExited {
				pid: self.pid,
				status: status.to_string(),
			});
		}
		self.terminated = true;

		if let Err(e) = signal_terminate(self.pid) {
			debug!(target = "subproc.launch", pid = self.pid, error = %e, "group SIGTERM unavailable; killing");
			return self.force_kill(grace);
		}

		let deadline = Instant::now() + grace;
		while Instant::now() < deadline {
			if let Some(status) = self.poll_exit() {
				debug!(target = "subproc.launch", pid = self.pid, %status, "process exited after SIGTERM");
				self.reap_group();
				return Ok(status);
			}
			std::thread::sleep(EXIT_POLL);
		}

		self.force_kill(grace)
	}

	fn force_kill(&mut self, grace: Duration) -> std::result::Result<ExitStatus, TeardownWarning> {
		if signal_kill(self.pid).is_err() {
			if let Err(e) = self.child.kill() {
				if let Some(status) = self.poll_exit() {
					return Ok(status);
				}
				return Err(TeardownWarning::SignalFailed {
					pid: self.pid,
					reason: e.to_string(),
				});
			}
		}

		match self.child.wait() {
			Ok(status) => {
				self.exit_status = Some(status);
				warn!(target = "subproc.launch", pid = self.pid, ?grace, "process did not exit after SIGTERM; killed");
				Err(TeardownWarning::ForcedKill { pid: self.pid, grace })
			}
			Err(e) => Err(TeardownWarning::SignalFailed {
				pid: self.pid,
				reason: e.to_string(),
			}),
		}
	}

	/// The leader is gone; make sure nothing it spawned survives it.
	fn reap_group(&self) {
		let _ = signal_kill(self.pid);
	}

	/// Waits for the capture threads and discards what they collected.
	pub fn drain_output(&mut self) -> DrainSummary {
		let mut summary = DrainSummary::default();
		if self.drained {
			return summary;
		}
		self.drained = true;

		for capture in [&mut self.stdout, &mut self.stderr] {
			if !capture.finish(CAPTURE_SETTLE) {
				summary.detached.push(capture.name());
			}
			summary.discarded_bytes += capture.discard();
		}
		summary
	}

	pub(crate) fn is_torn_down(&self) -> bool {
		self.terminated && self.drained
	}
}

impl Drop for AppProcess {
	fn drop(&mut self) {
		if self.is_torn_down() {
			return;
		}
		if !self.terminated {
			if let Err(warning) = self.terminate(self.grace_period) {
				debug!(target = "subproc.launch", pid = self.pid, %warning, "teardown on drop");
			}
		}
		self.drain_output();
	}
}

/// Result of draining captured output.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainSummary {
	pub discarded_bytes: usize,
	pub detached: Vec<&'static str>,
}
