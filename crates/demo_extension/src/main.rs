//! Calculator extension.
//!
//! Evaluates arithmetic queries such as `calc (2 + 3) * 4`. Speaks the worker protocol on
//! stdin/stdout and logs to stderr.

mod eval;

use std::sync::Arc;

use beacon_rpc::{Manifest, QueryHandler, QueryRequest, ResultItem};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const ID: &str = "calc";

struct Calculator;

impl QueryHandler for Calculator {
	async fn query(&self, request: QueryRequest) -> Result<Vec<ResultItem>, String> {
		let expression = request.query_text.trim();
		if expression.is_empty() {
			return Ok(Vec::new());
		}
		match eval::evaluate(expression) {
			Ok(value) => Ok(vec![ResultItem {
				description: Some(format!("{expression} =")),
				..ResultItem::new("result", eval::format(value), 1.0)
			}]),
			Err(err) => {
				debug!(generation = request.generation_id, error = %err, "not an expression");
				Ok(Vec::new())
			}
		}
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_env("BEACON_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let manifest = Manifest {
		keywords: vec![ID.to_string(), "=".to_string()],
		..Manifest::new(ID, "Calculator")
	};
	beacon_rpc::serve(manifest, Arc::new(Calculator), tokio::io::stdin(), tokio::io::stdout()).await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(text: &str) -> QueryRequest {
		QueryRequest {
			query_text: text.into(),
			generation_id: 7,
		}
	}

	#[tokio::test]
	async fn answers_expressions_only() {
		let items = Calculator.query(request("2 * (3 + 4)")).await.unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].label, "14");
		assert_eq!(items[0].description.as_deref(), Some("2 * (3 + 4) ="));

		assert!(Calculator.query(request("firefox")).await.unwrap().is_empty());
		assert!(Calculator.query(request("  ")).await.unwrap().is_empty());
	}
}
