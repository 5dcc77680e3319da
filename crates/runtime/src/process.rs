//! Process and port lifecycle helpers shared by the harness and its tests.

use std::io;
use std::net::TcpListener;
use std::path::PathBuf;

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if pid == 0 {
			return false;
		}

		if PathBuf::from("/proc").join(pid.to_string()).exists() {
			return !proc_status_is_zombie(pid);
		}

		std::process::Command::new("kill")
			.arg("-0")
			.arg(pid.to_string())
			.status()
			.map(|status| status.success())
			.unwrap_or(pid == std::process::id())
	}

	#[cfg(windows)]
	{
		let filter = format!("PID eq {pid}");
		if let Ok(output) = std::process::Command::new("tasklist").args(["/FI", &filter, "/FO", "CSV", "/NH"]).output() {
			if output.status.success() {
				let stdout = String::from_utf8_lossy(&output.stdout);
				return tasklist_has_pid(stdout.as_ref(), pid);
			}
		}

		pid == std::process::id()
	}

	#[cfg(not(any(unix, windows)))]
	{
		pid == std::process::id()
	}
}

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
	port_available_on("127.0.0.1", port)
}

/// Returns `true` when `port` can be bound on `host`.
pub fn port_available_on(host: &str, port: u16) -> bool {
	TcpListener::bind((host, port)).is_ok()
}

/// Asks the OS for an unused port on `host` and releases it immediately.
///
/// Another process may claim the port before the caller binds it; callers
/// that need certainty must handle a bind failure downstream.
pub fn free_port(host: &str) -> io::Result<u16> {
	let listener = TcpListener::bind((host, 0))?;
	Ok(listener.local_addr()?.port())
}

/// Sends SIGTERM to the process group led by `pid`.
pub fn signal_terminate(pid: u32) -> io::Result<()> {
	#[cfg(unix)]
	{
		signal_group(pid, libc::SIGTERM)
	}

	#[cfg(not(unix))]
	{
		let _ = pid;
		Err(io::Error::new(io::ErrorKind::Unsupported, "process group signals require unix"))
	}
}

/// Sends SIGKILL to the process group led by `pid`.
pub fn signal_kill(pid: u32) -> io::Result<()> {
	#[cfg(unix)]
	{
		signal_group(pid, libc::SIGKILL)
	}

	#[cfg(not(unix))]
	{
		let _ = pid;
		Err(io::Error::new(io::ErrorKind::Unsupported, "process group signals require unix"))
	}
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<()> {
	let pgid = libc::pid_t::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
	if pgid <= 0 {
		return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid 0"));
	}

	// SAFETY: kill(2) has no memory-safety preconditions; a negative pid
	// addresses the process group created for the child at spawn time.
	let rc = unsafe { libc::kill(-pgid, signal) };
	if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

/// Zombies keep their `/proc` entry until the parent reaps them.
#[cfg(unix)]
fn proc_status_is_zombie(pid: u32) -> bool {
	std::fs::read_to_string(PathBuf::from("/proc").join(pid.to_string()).join("status"))
		.map(|status| {
			status
				.lines()
				.find_map(|line| line.strip_prefix("State:"))
				.is_some_and(|state| state.trim_start().starts_with('Z'))
		})
		.unwrap_or(false)
}

#[cfg(any(test, windows))]
fn tasklist_has_pid(output: &str, pid: u32) -> bool {
	let pid_str = pid.to_string();
	output.lines().any(|line| {
		let line = line.trim();
		if !line.starts_with('"') {
			return false;
		}

		line.trim_matches('"')
			.split("\",\"")
			.nth(1)
			.is_some_and(|field| field.trim() == pid_str.as_str())
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tasklist_parser_matches_csv_line() {
		let output = "\"notify-demo.exe\",\"1234\",\"Console\",\"1\",\"12,000 K\"\r\n";
		assert!(tasklist_has_pid(output, 1234));
		assert!(!tasklist_has_pid(output, 9999));
	}

	#[test]
	fn tasklist_parser_ignores_non_csv_lines() {
		let output = "INFO: No tasks are running which match the specified criteria.\r\n";
		assert!(!tasklist_has_pid(output, 1234));
	}

	#[cfg(unix)]
	#[test]
	fn current_process_is_alive() {
		assert!(pid_is_alive(std::process::id()));
	}

	#[cfg(unix)]
	#[test]
	fn pid_zero_is_never_alive() {
		assert!(!pid_is_alive(0));
	}

	#[test]
	fn bound_port_is_reported_unavailable() {
		let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
		let port = listener.local_addr().unwrap().port();
		assert!(!port_available(port));
		drop(listener);
		assert!(port_available(port));
	}

	#[cfg(target_os = "linux")]
	#[test]
	fn availability_is_per_host() {
		let listener = TcpListener::bind(("127.0.0.2", 0)).unwrap();
		let port = listener.local_addr().unwrap().port();
		assert!(!port_available_on("127.0.0.2", port));
		assert!(port_available_on("127.0.0.1", port));
	}

	#[test]
	fn free_port_is_bindable() {
		let port = free_port("127.0.0.1").unwrap();
		assert_ne!(port, 0);
		assert!(port_available(port));
	}

	#[cfg(unix)]
	#[test]
	fn signal_zero_pid_is_rejected() {
		let err = signal_terminate(0).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
	}

	#[cfg(unix)]
	#[test]
	fn terminate_reaches_own_process_group() {
		use std::os::unix::process::CommandExt;

		let mut child = std::process::Command::new("sleep").arg("30").process_group(0).spawn().unwrap();
		signal_terminate(child.id()).unwrap();
		let status = child.wait().unwrap();
		assert!(!status.success());
		assert!(!pid_is_alive(child.id()));
	}
}
