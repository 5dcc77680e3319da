//! Launch specification for the application under test.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Host the application binds when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Immutable description of how to start the application under test.
///
/// The entry reference (`program`) is resolved against the working directory
/// when it contains a path separator, and searched on `PATH` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
	workdir: PathBuf,
	program: PathBuf,
	args: Vec<OsString>,
	host: String,
	port: Option<u16>,
	env: Vec<(OsString, OsString)>,
	addr_args: bool,
}

impl LaunchSpec {
	/// Creates a spec running `program` from `workdir` on an ephemeral localhost port.
	pub fn new(workdir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
		Self {
			workdir: workdir.into(),
			program: program.into(),
			args: Vec::new(),
			host: DEFAULT_HOST.to_string(),
			port: None,
			env: Vec::new(),
			addr_args: true,
		}
	}

	/// Appends one argument.
	pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
		self.args.push(arg.into());
		self
	}

	/// Appends several arguments.
	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	/// Sets the bind host.
	pub fn host(mut self, host: impl Into<String>) -> Self {
		self.host = host.into();
		self
	}

	/// Pins the bind port instead of picking a free one.
	pub fn port(mut self, port: u16) -> Self {
		self.port = Some(port);
		self
	}

	/// Adds an environment override for the child.
	pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}

	/// Stops the launcher from appending `--host`/`--port`; `HOST`/`PORT` are still exported.
	pub fn without_addr_args(mut self) -> Self {
		self.addr_args = false;
		self
	}

	pub fn workdir(&self) -> &Path {
		&self.workdir
	}

	pub fn program(&self) -> &Path {
		&self.program
	}

	pub fn extra_args(&self) -> &[OsString] {
		&self.args
	}

	pub fn bind_host(&self) -> &str {
		&self.host
	}

	pub fn fixed_port(&self) -> Option<u16> {
		self.port
	}

	pub fn env_overrides(&self) -> &[(OsString, OsString)] {
		&self.env
	}

	pub fn passes_addr_args(&self) -> bool {
		self.addr_args
	}

	/// Resolves the entry reference to an executable path.
	pub fn resolve_program(&self) -> Result<PathBuf, String> {
		if self.program.components().count() > 1 || self.program.is_absolute() {
			let candidate = self.workdir.join(&self.program);
			return if candidate.is_file() {
				Ok(candidate)
			} else {
				Err(format!("{} does not exist", candidate.display()))
			};
		}

		which::which(&self.program).map_err(|e| format!("{} not found on PATH: {}", self.program.display(), e))
	}

	/// Builds the full argument list for a resolved port.
	pub(crate) fn command_args(&self, port: u16) -> Vec<OsString> {
		let mut args = self.args.clone();
		if self.addr_args {
			args.push("--host".into());
			args.push(self.host.clone().into());
			args.push("--port".into());
			args.push(port.to_string().into());
		}
		args
	}
}
