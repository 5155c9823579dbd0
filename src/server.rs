//! Newline-delimited JSON over TCP.
//!
//! Each request line names a chapter URL; the reply is a sequence of event
//! lines ending in `finish` or `error`. A connection can carry any number of
//! requests, answered in order.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::translate::handler::RequestHandler;
use crate::translate::stream::StreamHandle;
use crate::translate::{ModelKind, Mode, TranslateError, TranslationRequest};

pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct WireRequest {
    prompt: String,
    #[serde(rename = "ignoreCache", default)]
    ignore_cache: bool,
    mode: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Text {
        text: String,
    },
    Finish,
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },
}

impl WireEvent {
    fn rejected(status: u16, message: impl Into<String>) -> Self {
        WireEvent::Error {
            status: Some(status),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("codec: {0}")]
    Codec(#[from] LinesCodecError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

type Connection = Framed<TcpStream, LinesCodec>;

fn parse_request(line: &str) -> Result<TranslationRequest, TranslateError> {
    let wire: WireRequest = serde_json::from_str(line)
        .map_err(|e| TranslateError::InvalidInput(format!("malformed request: {e}")))?;

    let url = wire.prompt.trim();
    if url.is_empty() {
        return Err(TranslateError::InvalidInput("prompt must be a chapter URL".into()));
    }
    let mode = match wire.mode.as_deref() {
        Some(raw) => raw.parse::<Mode>()?,
        None => Mode::default(),
    };
    let model = match wire.model.as_deref() {
        Some(raw) => raw.parse::<ModelKind>()?,
        None => ModelKind::default(),
    };
    Ok(TranslationRequest::new(url, mode, model).ignoring_cache(wire.ignore_cache))
}

/// Accept connections until `shutdown` fires. Connections in progress are
/// told to stop forwarding; translations they started keep running.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        let (socket, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let handler = Arc::clone(&handler);
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                debug!("connection opened");
                match handle_connection(socket, handler, shutdown).await {
                    Ok(()) => debug!("connection closed"),
                    Err(e) => debug!(error = %e, "connection dropped"),
                }
            }
            .instrument(info_span!("connection", peer = %peer)),
        );
    }
}

async fn handle_connection(
    socket: TcpStream,
    handler: Arc<RequestHandler>,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError> {
    let mut conn = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = conn.next() => match next {
                None => return Ok(()),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    send(&mut conn, &WireEvent::rejected(400, "request line too long")).await?;
                    continue;
                }
                Some(Err(e)) => return Err(e.into()),
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_request(&line) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "rejected request");
                send(&mut conn, &WireEvent::rejected(400, e.to_string())).await?;
                continue;
            }
        };

        let resolved = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown while resolving request");
                return Ok(());
            }
            resolved = handler.handle(request) => resolved,
        };
        match resolved {
            Ok(handle) => forward(&mut conn, &handle, &shutdown).await?,
            Err(e) => {
                warn!(error = %e, "request failed before streaming");
                send(&mut conn, &WireEvent::rejected(500, e.to_string())).await?;
            }
        }
    }
}

/// Relay one stream to the client. A write failure only ends this relay.
async fn forward(
    conn: &mut Connection,
    handle: &StreamHandle,
    shutdown: &CancellationToken,
) -> Result<(), ConnectionError> {
    let mut reader = Box::pin(handle.reader());

    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(stream_id = %handle.id(), "shutdown during forwarding");
                return Ok(());
            }
            item = reader.next() => item,
        };
        match item {
            Some(Ok(text)) => send(conn, &WireEvent::Text { text }).await?,
            Some(Err(failure)) => {
                let event = WireEvent::Error {
                    status: None,
                    message: failure.to_string(),
                };
                return send(conn, &event).await;
            }
            None => return send(conn, &WireEvent::Finish).await,
        }
    }
}

async fn send(conn: &mut Connection, event: &WireEvent) -> Result<(), ConnectionError> {
    let line = serde_json::to_string(event)?;
    conn.send(line).await?;
    Ok(())
}
