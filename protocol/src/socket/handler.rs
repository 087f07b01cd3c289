//! Per-connection state machine.
//!
//! Generic over the stream so tests can drive it through an in-memory
//! duplex pipe instead of a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{ConnectionObserver, SocketResponse, SocketServerConfig};
use crate::config::{
    GREETING_PREFIX, TLS_HANDSHAKE_RECORD, TLS_MAJOR_VERSION, V1_BLOCK_SIZE, V2_MAGIC,
};
use crate::crypto::Challenge;
use crate::dispatch::{Dispatcher, Transport, VoteSource};
use crate::error::VoteError;
use crate::ingest::{AcceptedVote, VoteProcessor};
use crate::wire::Protocol;

const TLS_REJECTION: &str = "TLS/SSL not supported - use plain TCP connection";
const INVALID_LENGTH: &str = "Invalid message length";
const DEBUG_DUMP_BYTES: usize = 64;

/// Everything a connection needs, shared across all of them.
pub struct ConnectionContext {
    pub processor: VoteProcessor,
    pub dispatcher: Dispatcher,
    pub config: SocketServerConfig,
    pub observer: Arc<dyn ConnectionObserver>,
}

/// Why a connection ended without a response.
#[derive(Debug)]
enum Abort {
    Timeout,
    Io(std::io::Error),
}

/// Reports the connection closed when dropped, so aborted or panicking
/// connection tasks still balance `connection_opened`.
struct OpenConnection<'a> {
    observer: &'a dyn ConnectionObserver,
}

impl<'a> OpenConnection<'a> {
    fn new(observer: &'a dyn ConnectionObserver) -> Self {
        observer.connection_opened();
        Self { observer }
    }
}

impl Drop for OpenConnection<'_> {
    fn drop(&mut self) {
        self.observer.connection_closed();
    }
}

/// Run one connection to completion. Always shuts the stream down.
pub async fn handle_connection<S>(mut stream: S, remote: Option<SocketAddr>, ctx: &ConnectionContext)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let open = OpenConnection::new(ctx.observer.as_ref());
    let remote_label = remote.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string());
    debug!(remote = %remote_label, "socket connection opened");

    let challenge = Challenge::generate();
    let limit = ctx.config.read_timeout;

    let outcome = match greet(&mut stream, &challenge, limit).await {
        Ok(()) => read_submission(&mut stream, ctx, &challenge).await,
        Err(abort) => Err(abort),
    };

    let response = match outcome {
        Ok(Ok(accepted)) => {
            accept(&accepted, remote, &remote_label, ctx);
            Some(SocketResponse::ok())
        }
        Ok(Err(error)) => {
            warn!(remote = %remote_label, error = %error, "socket vote rejected");
            ctx.observer.vote_rejected(&error);
            Some(SocketResponse::error(error.public_message()))
        }
        Err(Abort::Timeout) => {
            warn!(remote = %remote_label, timeout_secs = limit.as_secs(), "socket connection timed out");
            None
        }
        Err(Abort::Io(e)) => {
            debug!(remote = %remote_label, error = %e, "socket connection dropped");
            None
        }
    };

    if let Some(response) = response {
        if let Err(abort) = write_timed(&mut stream, response.to_json().as_bytes(), limit).await {
            debug!(remote = %remote_label, error = ?abort, "failed to write socket response");
        }
    }
    drop(open);
    let _ = stream.shutdown().await;
}

fn accept(accepted: &AcceptedVote, remote: Option<SocketAddr>, remote_label: &str, ctx: &ConnectionContext) {
    let vote = &accepted.vote;
    let source = VoteSource::new(accepted.protocol, Transport::Socket, remote);
    if let Err(e) = ctx.dispatcher.dispatch(vote, &source) {
        warn!(username = vote.username(), error = %e, "accepted vote was not recorded");
    }
    ctx.observer.vote_accepted(accepted);
    info!(
        remote = %remote_label,
        protocol = %accepted.protocol,
        service = vote.service_name(),
        username = vote.username(),
        "socket vote accepted"
    );
}

async fn greet<S>(stream: &mut S, challenge: &Challenge, limit: Duration) -> Result<(), Abort>
where
    S: AsyncWrite + Unpin,
{
    let greeting = format!("{GREETING_PREFIX} {challenge}\n");
    write_timed(stream, greeting.as_bytes(), limit).await
}

/// DETECT and the branch it selects. The outer `Result` is transport
/// trouble (no response possible); the inner one is the vote verdict.
async fn read_submission<S>(
    stream: &mut S,
    ctx: &ConnectionContext,
    challenge: &Challenge,
) -> Result<Result<AcceptedVote, VoteError>, Abort>
where
    S: AsyncRead + Unpin,
{
    let limit = ctx.config.read_timeout;
    let mut head = [0u8; 2];
    read_exact_timed(stream, &mut head, limit).await?;

    if u16::from_be_bytes(head) == V2_MAGIC {
        return read_modern(stream, ctx, challenge).await;
    }

    if head == [TLS_HANDSHAKE_RECORD, TLS_MAJOR_VERSION] {
        return Ok(Err(VoteError::InvalidFraming(TLS_REJECTION.to_string())));
    }

    read_legacy(stream, ctx, head).await
}

async fn read_legacy<S>(
    stream: &mut S,
    ctx: &ConnectionContext,
    head: [u8; 2],
) -> Result<Result<AcceptedVote, VoteError>, Abort>
where
    S: AsyncRead + Unpin,
{
    if !ctx.processor.toggles().legacy_enabled {
        return Ok(Err(VoteError::ProtocolDisabled(Protocol::Legacy)));
    }

    let mut block = [0u8; V1_BLOCK_SIZE];
    block[..2].copy_from_slice(&head);
    read_exact_timed(stream, &mut block[2..], ctx.config.read_timeout).await?;

    let result = ctx.processor.process_legacy_block(&block);
    if ctx.config.debug {
        if let Err(e) = &result {
            debug!(
                error = %e,
                head = %hex::encode(&block[..DEBUG_DUMP_BYTES]),
                "undecodable V1 block"
            );
        }
    }
    Ok(result)
}

async fn read_modern<S>(
    stream: &mut S,
    ctx: &ConnectionContext,
    challenge: &Challenge,
) -> Result<Result<AcceptedVote, VoteError>, Abort>
where
    S: AsyncRead + Unpin,
{
    if !ctx.processor.toggles().modern_enabled {
        return Ok(Err(VoteError::ProtocolDisabled(Protocol::Modern)));
    }

    let limit = ctx.config.read_timeout;
    let mut len = [0u8; 2];
    read_exact_timed(stream, &mut len, limit).await?;
    let length = usize::from(u16::from_be_bytes(len));

    if length == 0 || length > ctx.config.max_message_length {
        debug!(length, "rejecting V2 message length");
        return Ok(Err(VoteError::InvalidFraming(INVALID_LENGTH.to_string())));
    }

    let mut message = vec![0u8; length];
    read_exact_timed(stream, &mut message, limit).await?;

    let Ok(json) = String::from_utf8(message) else {
        return Ok(Err(VoteError::parse(Protocol::Modern, "message is not valid UTF-8")));
    };
    Ok(ctx.processor.process_modern_envelope(&json, Some(challenge)))
}

async fn read_exact_timed<S>(stream: &mut S, buf: &mut [u8], limit: Duration) -> Result<(), Abort>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(limit, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(Abort::Io(e)),
        Err(_) => Err(Abort::Timeout),
    }
}

async fn write_timed<S>(stream: &mut S, bytes: &[u8], limit: Duration) -> Result<(), Abort>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Abort::Io(e)),
        Err(_) => Err(Abort::Timeout),
    }
}
