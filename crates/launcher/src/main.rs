//! `beacon`: headless driver for the launcher core.
//!
//! Runs a single `--query`, or reads queries from stdin one per line. Lines starting with `:`
//! are commands; see [`repl`].

mod cli;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use beacon_core::{LauncherConfig, QueryOutcome, Session};
use beacon_worker::ProcessLauncher;
use clap::Parser;
use cli::Cli;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	setup_tracing(cli.verbose);

	let mut config = LauncherConfig::load(cli.config.as_deref()).context("loading configuration")?;
	if let Some(dir) = cli.extensions {
		config.extensions.dir = Some(dir);
	}
	let session = Session::from_config(&config, Arc::new(ProcessLauncher::new())).context("starting session")?;
	info!(extensions = session.extensions().len(), "beacon ready");

	let result = match cli.query {
		Some(text) => {
			wait_for_extensions(&session, Duration::from_millis(cli.wait_ms)).await;
			let outcome = session.query(&text).await;
			print_outcome(&outcome);
			Ok(())
		}
		None => repl::run(&session).await,
	};

	session.shutdown().await;
	result
}

/// Waits until every registered extension accepts queries, or `limit` passes.
async fn wait_for_extensions(session: &Session, limit: Duration) {
	let deadline = tokio::time::Instant::now() + limit;
	for status in session.extensions() {
		let Some(mut rx) = session.supervisor().watch(&status.spec.id) else {
			continue;
		};
		let settled = rx.wait_for(|s| s.state.is_accepting() || s.needs_reload());
		if tokio::time::timeout_at(deadline, settled).await.is_err() {
			info!(extension = %status.spec.id, "extension not ready in time");
		}
	}
}

pub(crate) fn print_outcome(outcome: &QueryOutcome) {
	match outcome {
		QueryOutcome::Ranked(results) => {
			for item in &results.items {
				println!("{:>6.3}  {}  [{}]  {}", item.score, item.label, item.source, item.id);
			}
			if !results.timed_out.is_empty() {
				let names: Vec<&str> = results.timed_out.iter().map(|id| &**id).collect();
				println!("(no answer from: {})", names.join(", "));
			}
		}
		QueryOutcome::Superseded { generation, by } => println!("(query {generation} superseded by {by})"),
	}
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_env("BEACON_LOG")
			.or_else(|_| EnvFilter::try_from_default_env())
			.unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("beacon=debug,beacon_core=debug,beacon_worker=debug,beacon_rpc=debug,info")
				} else {
					EnvFilter::new("warn")
				}
			})
	};

	if let Some(log_dir) = std::env::var("BEACON_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("beacon.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_target(true);
			tracing_subscriber::registry().with(filter()).with(file_layer).init();
			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	// stdout carries results, so logs go to stderr.
	tracing_subscriber::fmt()
		.with_env_filter(filter())
		.with_writer(std::io::stderr)
		.init();
}
