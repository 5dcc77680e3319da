use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "notify-demo")]
#[command(about = "Notification server streaming published messages as server-sent events")]
#[command(version)]
pub struct Args {
	/// Address to bind
	#[arg(long, env = "HOST", default_value = "127.0.0.1")]
	pub host: String,

	/// Port to bind (0 picks a free one)
	#[arg(long, env = "PORT", default_value_t = 8000)]
	pub port: u16,

	/// Wait this long before binding, to simulate a slow start
	#[arg(long, value_name = "MS", default_value_t = 0)]
	pub startup_delay_ms: u64,

	/// Interval between keep-alive comments on open event streams
	#[arg(long, value_name = "SECS", default_value_t = 15)]
	pub keep_alive_secs: u64,

	/// Messages buffered per topic before slow subscribers lag
	#[arg(long, default_value_t = crate::channels::DEFAULT_CAPACITY)]
	pub channel_capacity: usize,

	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_override_defaults() {
		let args = Args::try_parse_from(["notify-demo", "--host", "::1", "--port", "9100", "--startup-delay-ms", "250", "-vv"]).unwrap();
		assert_eq!(args.host, "::1");
		assert_eq!(args.port, 9100);
		assert_eq!(args.startup_delay_ms, 250);
		assert_eq!(args.verbose, 2);
	}

	#[test]
	fn unknown_flags_are_rejected() {
		assert!(Args::try_parse_from(["notify-demo", "--bogus"]).is_err());
	}
}
