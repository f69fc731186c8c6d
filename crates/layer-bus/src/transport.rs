//! # Transport Boundary
//!
//! Extension point for carrying envelopes beyond the process. The bus never
//! calls a transport itself; bridges built on top of it do.
//!
//! [`LoopbackTransport`] is an in-process implementation over a
//! `tokio::sync::broadcast` channel. Slow receivers that lag behind skip
//! the envelopes they missed.

use async_trait::async_trait;
use bus_types::{Envelope, Event, MessageKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

/// Default loopback buffer.
pub const DEFAULT_TRANSPORT_CAPACITY: usize = 1000;

/// Errors from transport operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Payload serialization failed: {0}")]
    Serialization(String),

    #[error("Expected a {expected} envelope, found {found}")]
    KindMismatch {
        expected: MessageKind,
        found: MessageKind,
    },

    /// Nobody is listening.
    #[error("No receivers attached to transport")]
    NoReceivers,
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Serialized form of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub kind: MessageKind,
    pub payload_type: String,
    pub envelope: Envelope,
    pub payload: serde_json::Value,
}

impl WireEnvelope {
    /// Serialize an event.
    ///
    /// # Errors
    ///
    /// `Serialization` if the payload cannot be encoded as JSON.
    pub fn from_event<T: Serialize>(event: &Event<T>) -> Result<Self, TransportError> {
        Ok(Self {
            kind: MessageKind::Event,
            payload_type: type_name::<T>().to_string(),
            envelope: event.envelope.clone(),
            payload: serde_json::to_value(&event.payload)?,
        })
    }

    /// Rebuild a typed event.
    ///
    /// # Errors
    ///
    /// `KindMismatch` for non-event envelopes, `Serialization` if the
    /// payload does not decode as `T`.
    pub fn into_event<T: DeserializeOwned>(self) -> Result<Event<T>, TransportError> {
        if self.kind != MessageKind::Event {
            return Err(TransportError::KindMismatch {
                expected: MessageKind::Event,
                found: self.kind,
            });
        }
        Ok(Event {
            envelope: self.envelope,
            payload: serde_json::from_value(self.payload)?,
        })
    }
}

/// Stream of received envelopes.
pub type EnvelopeStream = Pin<Box<dyn Stream<Item = WireEnvelope> + Send>>;

/// Boundary implemented by cross-process carriers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an envelope to the carrier.
    async fn send(&self, envelope: WireEnvelope) -> Result<(), TransportError>;

    /// Envelopes arriving from now on.
    fn receive(&self) -> EnvelopeStream;
}

/// In-process transport over a broadcast channel.
pub struct LoopbackTransport {
    sender: broadcast::Sender<WireEnvelope>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRANSPORT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, envelope: WireEnvelope) -> Result<(), TransportError> {
        let message_id = envelope.envelope.id;
        match self.sender.send(envelope) {
            Ok(receivers) => {
                debug!(%message_id, receivers, "Envelope sent over loopback");
                Ok(())
            }
            Err(_) => Err(TransportError::NoReceivers),
        }
    }

    fn receive(&self) -> EnvelopeStream {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(envelope) => Some(envelope),
            Err(BroadcastStreamRecvError::Lagged(count)) => {
                debug!(lagged = count, "Loopback receiver lagged, envelopes dropped");
                None
            }
        });
        Box::pin(stream)
    }
}
