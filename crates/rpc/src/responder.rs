//! Extension side of the protocol.
//!
//! [`serve`] announces the extension's [`Manifest`], then answers heartbeats inline and runs
//! each query on its own task so a slow query never delays a heartbeat acknowledgement.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::frame::{DEFAULT_MAX_FRAME_BYTES, Frame, read_frame, write_frame};
use crate::message::{ErrorBody, EventBody, Manifest, QueryRequest, RequestBody, ResponseBody, ResultItem};
use crate::protocol::Inbound;
use crate::Result;

/// Produces results for the queries routed to an extension.
pub trait QueryHandler: Send + Sync + 'static {
	/// Answers one query.
	///
	/// An `Err` is sent back as an error frame for this request only.
	fn query(&self, request: QueryRequest) -> impl Future<Output = std::result::Result<Vec<ResultItem>, String>> + Send;
}

/// Runs the extension side of a connection until shutdown or end of stream.
///
/// # Errors
///
/// Returns an error if the launcher sends a malformed frame or the transport fails.
pub async fn serve<H, R, W>(manifest: Manifest, handler: Arc<H>, reader: R, mut writer: W) -> Result<()>
where
	H: QueryHandler,
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send,
{
	let max = DEFAULT_MAX_FRAME_BYTES;
	write_frame(&mut writer, &Frame::event(&EventBody::Manifest(manifest.clone()))?, max).await?;
	info!(extension = %manifest.id, "extension announced");

	let (frames_tx, mut frames) = mpsc::channel(32);
	let pump = tokio::spawn(async move {
		let mut reader = BufReader::new(reader);
		loop {
			let result = read_frame(&mut reader, max).await;
			let last = !matches!(result, Ok(Some(_)));
			if frames_tx.send(result).await.is_err() || last {
				break;
			}
		}
	});

	let mut tasks: JoinSet<(u64, std::result::Result<Vec<ResultItem>, String>)> = JoinSet::new();
	let outcome = loop {
		tokio::select! {
			done = tasks.join_next(), if !tasks.is_empty() => {
				let Some(done) = done else { continue };
				let frame = match done {
					Ok((id, Ok(items))) => Frame::response(id, &ResponseBody::Results { items })?,
					Ok((id, Err(message))) => Frame::failure(id, &ErrorBody { message })?,
					Err(err) => {
						warn!(extension = %manifest.id, error = %err, "query task failed");
						continue;
					}
				};
				if let Err(err) = write_frame(&mut writer, &frame, max).await {
					break Err(err);
				}
			}

			frame = frames.recv() => {
				let frame = match frame {
					Some(Ok(Some(frame))) => frame,
					Some(Ok(None)) | None => break Ok(()),
					Some(Err(err)) => break Err(err),
				};
				match Inbound::decode(&frame) {
					Ok(Inbound::Request(id, RequestBody::Query(request))) => {
						let handler = Arc::clone(&handler);
						tasks.spawn(async move { (id, handler.query(request).await) });
					}
					Ok(Inbound::Event(EventBody::Heartbeat { seq })) => {
						let ack = Frame::event(&EventBody::HeartbeatAck { seq })?;
						if let Err(err) = write_frame(&mut writer, &ack, max).await {
							break Err(err);
						}
					}
					Ok(Inbound::Event(EventBody::Shutdown)) => {
						info!(extension = %manifest.id, "shutdown requested");
						break Ok(());
					}
					Ok(other) => debug!(extension = %manifest.id, message = ?other, "ignored inbound message"),
					Err(err) => break Err(err),
				}
			}
		}
	};

	pump.abort();
	tasks.abort_all();
	outcome
}
