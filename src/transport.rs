//! Request/response transport between the coordinator and participants.
//!
//! One call opens one connection, writes one framed [`Request`], reads one
//! framed [`Response`] and drops the connection. Failures are never raised:
//! they come back as [`Outcome`] variants for the caller to turn into a vote.

use futures::{SinkExt, StreamExt};
use log::trace;
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::errors::{Result, SeshatError};
use crate::message::{Request, Response, Status, DEFAULT_MAX_FRAME_LENGTH};
use crate::registry::ParticipantRef;

/// Length-prefixed framing shared by both ends of a connection.
pub fn frame_codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Result of one transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok(Response),
    Timeout,
    ConnectionRefused,
    OtherError(String),
}

impl Outcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Ok(response) => Some(response),
            _ => None,
        }
    }

    /// Status of the response, if one arrived.
    pub fn status(&self) -> Option<Status> {
        self.response().map(|r| r.status)
    }

    pub fn is(&self, status: Status) -> bool {
        self.status() == Some(status)
    }

    /// Human-readable explanation, used verbatim in transaction logs.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Ok(response) => response
                .reason
                .clone()
                .unwrap_or_else(|| response.status.to_string()),
            Outcome::Timeout => "Connection timed out".to_string(),
            Outcome::ConnectionRefused => "Connection refused - node down?".to_string(),
            Outcome::OtherError(message) => message.clone(),
        }
    }
}

/// Trait for delivering one request to one participant.
pub trait Transport: Send + Sync {
    /// Sends `request` to `node` and waits at most `timeout` for the answer.
    fn send(
        &self,
        node: &ParticipantRef,
        request: &Request,
        timeout: Duration,
    ) -> impl Future<Output = Outcome> + Send;
}

/// Transport over plain TCP, one connection per call.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame_length: usize,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl TcpTransport {
    pub fn new(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    async fn exchange(&self, node: &ParticipantRef, request: &Request) -> Result<Response> {
        let stream = TcpStream::connect((node.host.as_str(), node.port)).await?;
        // The framed stream owns the socket; dropping it on any return path closes the connection.
        let mut framed = Framed::new(stream, frame_codec(self.max_frame_length));

        framed.send(request.encode()?).await?;
        let frame = framed.next().await.ok_or_else(|| {
            SeshatError::Other(format!("{} closed the connection without answering", node))
        })??;

        Response::decode(&frame)
    }
}

impl Transport for TcpTransport {
    fn send(
        &self,
        node: &ParticipantRef,
        request: &Request,
        timeout: Duration,
    ) -> impl Future<Output = Outcome> + Send {
        async move {
            trace!("Sending {:?} to {}", request.command, node);
            match tokio::time::timeout(timeout, self.exchange(node, request)).await {
                Err(_) => Outcome::Timeout,
                Ok(Ok(response)) => Outcome::Ok(response),
                Ok(Err(SeshatError::Io(e))) => match e.kind() {
                    ErrorKind::ConnectionRefused => Outcome::ConnectionRefused,
                    ErrorKind::TimedOut => Outcome::Timeout,
                    _ => Outcome::OtherError(e.to_string()),
                },
                Ok(Err(e)) => Outcome::OtherError(e.to_string()),
            }
        }
    }
}
