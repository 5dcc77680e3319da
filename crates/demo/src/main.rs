use clap::Parser;
use notify_demo::{cli::Args, logging, server};
use tracing::error;

#[tokio::main]
async fn main() {
	let args = Args::parse();
	logging::init_logging(args.verbose);

	if let Err(err) = server::run(args).await {
		error!(target = "notify.server", error = %format!("{err:#}"), "server failed");
		std::process::exit(1);
	}
}
