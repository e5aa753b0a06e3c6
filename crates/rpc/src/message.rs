//! JSON payloads carried inside frames.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Protocol version both ends must agree on during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Launcher-to-worker requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBody {
	/// Produce results for a query.
	Query(QueryRequest),
}

/// Payload of [`RequestBody::Query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
	/// Raw text as typed by the user.
	pub query_text: String,
	/// Generation of the query on the launcher side.
	pub generation_id: u64,
}

/// Worker-to-launcher responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
	/// Results for a query request.
	Results {
		/// Produced items, in any order.
		items: Vec<ResultItem>,
	},
}

/// One extension-provided result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
	/// Id, unique within the extension.
	pub id: String,
	/// Display label.
	pub label: String,
	/// Raw relevance score; clamped to `0.0..=1.0` by the launcher.
	pub score: f64,
	/// Optional secondary line.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Opaque data handed back to the extension when the item is activated.
	#[serde(default, skip_serializing_if = "JsonValue::is_null")]
	pub metadata: JsonValue,
}

impl ResultItem {
	/// Creates an item without description or metadata.
	pub fn new(id: impl Into<String>, label: impl Into<String>, score: f64) -> Self {
		Self {
			id: id.into(),
			label: label.into(),
			score,
			description: None,
			metadata: JsonValue::Null,
		}
	}
}

/// Unsolicited messages, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventBody {
	/// First message of a worker: who it is and what it speaks.
	Manifest(Manifest),
	/// Liveness probe from the launcher.
	Heartbeat {
		/// Probe sequence number.
		seq: u64,
	},
	/// Answer to [`EventBody::Heartbeat`].
	HeartbeatAck {
		/// Sequence number being acknowledged.
		seq: u64,
	},
	/// Worker-side error report not tied to a request.
	Error {
		/// Human readable message.
		message: String,
	},
	/// Launcher asks the worker to exit.
	Shutdown,
}

/// Identity a worker announces during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
	/// Must equal [`PROTOCOL_VERSION`].
	pub protocol_version: u32,
	/// Extension id; must match the id the worker was launched as.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Weight applied to every score this extension returns.
	#[serde(default = "default_priority_weight")]
	pub priority_weight: f64,
	/// Keywords that route a query exclusively to this extension.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub keywords: Vec<String>,
}

fn default_priority_weight() -> f64 {
	1.0
}

impl Manifest {
	/// Creates a manifest for the current protocol version.
	pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			protocol_version: PROTOCOL_VERSION,
			id: id.into(),
			name: name.into(),
			priority_weight: default_priority_weight(),
			keywords: Vec::new(),
		}
	}
}

/// Payload of an error frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	/// Human readable message.
	pub message: String,
}
