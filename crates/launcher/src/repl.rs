//! Line-oriented driver.
//!
//! Every line is a query, except:
//!
//! | Line | Effect |
//! |------|--------|
//! | `:select <id>` | records a selection of candidate `<id>` |
//! | `:status` | prints every extension's state |
//! | `:reload <id>` | restarts extension `<id>`, clearing its restart budget |
//! | `:quit` | exits |

use beacon_core::{CandidateId, Session};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::print_outcome;

/// A parsed input line.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
	Query(&'a str),
	Select(&'a str),
	Status,
	Reload(&'a str),
	Quit,
	Unknown(&'a str),
}

fn parse(line: &str) -> Line<'_> {
	let Some(command) = line.trim().strip_prefix(':') else {
		return Line::Query(line);
	};
	let (name, arg) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
	let arg = arg.trim();
	match (name, arg.is_empty()) {
		("select", false) => Line::Select(arg),
		("reload", false) => Line::Reload(arg),
		("status", true) => Line::Status,
		("quit" | "q", true) => Line::Quit,
		_ => Line::Unknown(command),
	}
}

pub(crate) async fn run(session: &Session) -> anyhow::Result<()> {
	let mut lines = BufReader::new(tokio::io::stdin()).lines();
	while let Some(line) = lines.next_line().await? {
		match parse(&line) {
			Line::Query(text) => print_outcome(&session.query(text).await),
			Line::Select(id) => {
				session.select(&CandidateId::new(id));
				println!("selected {id}");
			}
			Line::Status => {
				for status in session.extensions() {
					let snap = &status.snapshot;
					print!("{:<20} {:<11} restarts={}", status.spec.id, snap.state.as_str(), snap.restarts);
					if snap.exhausted {
						print!(" exhausted");
					}
					if snap.rejected {
						print!(" rejected");
					}
					match &snap.last_error {
						Some(err) => println!("  last error: {err}"),
						None => println!(),
					}
				}
			}
			Line::Reload(id) => {
				if let Err(err) = session.supervisor().reload(id).await {
					warn!(extension = id, error = %err, "reload failed");
					println!("reload failed: {err}");
				}
			}
			Line::Quit => break,
			Line::Unknown(command) => println!("unknown command `:{command}`"),
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_commands() {
		assert_eq!(parse("fire"), Line::Query("fire"));
		assert_eq!(parse(""), Line::Query(""));
		assert_eq!(parse(":select firefox.desktop"), Line::Select("firefox.desktop"));
		assert_eq!(parse("  :status "), Line::Status);
		assert_eq!(parse(":reload calc"), Line::Reload("calc"));
		assert_eq!(parse(":q"), Line::Quit);
		assert_eq!(parse(":select"), Line::Unknown("select"));
		assert_eq!(parse(":frobnicate x"), Line::Unknown("frobnicate x"));
	}
}
