use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(about = "Query the beacon launcher core from the command line")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Configuration file (defaults to the user config directory)
	#[arg(short, long, value_name = "PATH")]
	pub config: Option<PathBuf>,

	/// Extensions directory, overriding the configuration
	#[arg(short, long, value_name = "DIR")]
	pub extensions: Option<PathBuf>,

	/// Run one query, print the results and exit
	#[arg(short, long)]
	pub query: Option<String>,

	/// Milliseconds to wait for extensions to become ready before a one-shot query
	#[arg(long, default_value_t = 2000)]
	pub wait_ms: u64,

	/// Verbose logging
	#[arg(short, long)]
	pub verbose: bool,
}
