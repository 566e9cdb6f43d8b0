//! Typed protocol messages and the decoded message source.
//!
//! Wire framing is out of scope: a [`MessageSource`] delivers messages
//! already decoded. The engine consumes `LogRestart`/`LogUpdate` (raw log
//! text), `QueueInfo` (the live snapshot), `SlotInfo`, and `Heartbeat`;
//! the remaining message kinds are retained for completeness.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fw_core::snapshot::{SlotInfoEntry, UnitSnapshot};

/// A decoded message from the client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat,
    Info(serde_json::Value),
    Options(serde_json::Value),
    SlotInfo(Vec<SlotInfoEntry>),
    SlotOptions(serde_json::Value),
    QueueInfo(Vec<UnitSnapshot>),
    /// Raw log text replacing everything seen so far.
    LogRestart(String),
    /// Raw log text appended to what was seen so far.
    LogUpdate(String),
}

/// Transport errors surfaced to the retrieval caller.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A source of decoded protocol messages for one client connection.
///
/// `next_message` resolves to `Ok(None)` when no further messages are
/// pending in the current cycle. `send_command` issues a supplementary
/// request back through the connection.
pub trait MessageSource: Send {
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<ClientMessage>, TransportError>> + Send;

    fn send_command(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// An in-memory message source, for tests and offline replay.
#[derive(Debug, Default)]
pub struct QueuedSource {
    messages: std::collections::VecDeque<Result<ClientMessage, TransportError>>,
    pub sent_commands: Vec<String>,
}

impl QueuedSource {
    #[must_use]
    pub fn new(messages: Vec<ClientMessage>) -> Self {
        Self {
            messages: messages.into_iter().map(Ok).collect(),
            sent_commands: Vec::new(),
        }
    }

    /// Queues a transport failure to surface after earlier messages drain.
    pub fn push_error(&mut self, error: TransportError) {
        self.messages.push_back(Err(error));
    }

    pub fn push(&mut self, message: ClientMessage) {
        self.messages.push_back(Ok(message));
    }
}

impl MessageSource for QueuedSource {
    async fn next_message(&mut self) -> Result<Option<ClientMessage>, TransportError> {
        match self.messages.pop_front() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn send_command(&mut self, command: &str) -> Result<(), TransportError> {
        self.sent_commands.push(command.to_string());
        Ok(())
    }
}
