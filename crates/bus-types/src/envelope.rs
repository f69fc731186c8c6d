//! # Message Envelopes
//!
//! Every message travelling through the bus is wrapped in an `Envelope`
//! header plus a typed payload.
//!
//! ## Header Properties
//!
//! - **Identity**: `id` is a fresh UUID per construction.
//! - **Ordering**: `timestamp` is process-wide non-decreasing (microseconds).
//! - **Correlation**: `correlation_id` follows a causal chain; it defaults
//!   to the envelope's own id.
//! - **Routing**: `source` is mandatory; a `None` destination is a broadcast.
//!
//! Envelopes are built with consuming builder methods, so metadata and the
//! correlation id are fixed before the message is handed to the bus.

use crate::layer::Layer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Metadata flag requesting a routing bypass. Honored only when the bus
/// configuration allows it.
pub const BYPASS_ROUTING_KEY: &str = "bypass-routing";

/// Metadata override for a command's timeout, in milliseconds.
pub const TIMEOUT_OVERRIDE_KEY: &str = "timeout-ms";

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Microseconds since the Unix epoch, never lower than a previous call.
fn next_timestamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    let previous = LAST_TIMESTAMP.fetch_max(now, Ordering::SeqCst);
    previous.max(now)
}

/// Header shared by events, commands, queries and responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message id.
    pub id: Uuid,
    /// Construction time, microseconds since the Unix epoch.
    pub timestamp: u64,
    /// Originating layer.
    pub source: Layer,
    /// Target layer. `None` broadcasts to every reachable layer.
    pub destination: Option<Layer>,
    /// Free-form string metadata, ordered by key.
    pub metadata: BTreeMap<String, String>,
    /// Causal chain identifier.
    pub correlation_id: String,
}

impl Envelope {
    /// Create a header originating from `source`.
    #[must_use]
    pub fn new(source: Layer) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            timestamp: next_timestamp(),
            source,
            destination: None,
            metadata: BTreeMap::new(),
            correlation_id: id.to_string(),
        }
    }

    /// Look up a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Whether the caller asked for a routing bypass.
    #[must_use]
    pub fn requests_bypass(&self) -> bool {
        self.metadata_value(BYPASS_ROUTING_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Timeout override from metadata, if present and parseable.
    #[must_use]
    pub fn timeout_override(&self) -> Option<Duration> {
        self.metadata_value(TIMEOUT_OVERRIDE_KEY)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    }
}

/// Access to the header of any envelope kind.
pub trait Message {
    fn envelope(&self) -> &Envelope;
}

/// Builder methods shared by every envelope kind.
macro_rules! envelope_builders {
    () => {
        /// Address the message to a single layer.
        #[must_use]
        pub fn to(mut self, destination: $crate::layer::Layer) -> Self {
            self.envelope.destination = Some(destination);
            self
        }

        /// Attach a metadata entry.
        #[must_use]
        pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.envelope.metadata.insert(key.into(), value.into());
            self
        }

        /// Override the generated correlation id.
        #[must_use]
        pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
            self.envelope.correlation_id = correlation_id.into();
            self
        }

        /// Continue the causal chain of `parent`.
        #[must_use]
        pub fn caused_by(mut self, parent: &$crate::envelope::Envelope) -> Self {
            self.envelope.correlation_id = parent.correlation_id.clone();
            self
        }

        /// Request a routing bypass (see `BusConfig::allow_routing_bypass`).
        #[must_use]
        pub fn bypass_routing(self) -> Self {
            self.with_metadata($crate::envelope::BYPASS_ROUTING_KEY, "true")
        }

        pub fn id(&self) -> uuid::Uuid {
            self.envelope.id
        }
    };
}

/// Fire-and-forget notification delivered to zero or more handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    pub envelope: Envelope,
    pub payload: T,
}

impl<T> Event<T> {
    #[must_use]
    pub fn new(source: Layer, payload: T) -> Self {
        Self {
            envelope: Envelope::new(source),
            payload,
        }
    }

    envelope_builders!();
}

impl<T> Message for Event<T> {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// Request handled by exactly one handler, which defines the result type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command<T> {
    pub envelope: Envelope,
    pub payload: T,
}

impl<T> Command<T> {
    #[must_use]
    pub fn new(source: Layer, payload: T) -> Self {
        Self {
            envelope: Envelope::new(source),
            payload,
        }
    }

    envelope_builders!();

    /// Per-call timeout, stored as the `timeout-ms` metadata entry.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().to_string();
        self.with_metadata(TIMEOUT_OVERRIDE_KEY, millis)
    }
}

impl<T> Message for Command<T> {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// Read request answered by exactly one handler per `(T, R)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query<T, R> {
    pub envelope: Envelope,
    pub payload: T,
    /// Whether successful responses may be cached.
    pub cacheable: bool,
    /// Explicit cache key. Derived from the payload when absent.
    pub cache_key: Option<String>,
    /// Handler deadline. The bus default applies when absent.
    pub timeout: Option<Duration>,
    /// Cache TTL override. The bus default applies when absent.
    pub cache_ttl: Option<Duration>,
    #[serde(skip)]
    response: PhantomData<fn() -> R>,
}

impl<T, R> Query<T, R> {
    #[must_use]
    pub fn new(source: Layer, payload: T) -> Self {
        Self {
            envelope: Envelope::new(source),
            payload,
            cacheable: false,
            cache_key: None,
            timeout: None,
            cache_ttl: None,
            response: PhantomData,
        }
    }

    envelope_builders!();

    /// Allow the response to be served from cache.
    #[must_use]
    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Cache under a fixed key instead of a payload digest.
    #[must_use]
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cacheable = true;
        self.cache_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }
}

impl<T, R> Message for Query<T, R> {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// Answer to a query.
///
/// A failed response always carries `R::default()` and a non-empty error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<R> {
    pub envelope: Envelope,
    pub payload: R,
    pub success: bool,
    pub error: Option<String>,
}

impl<R> Response<R> {
    /// Successful answer addressed back to the query's source.
    #[must_use]
    pub fn success(query: &Envelope, payload: R) -> Self {
        Self {
            envelope: reply_envelope(query),
            payload,
            success: true,
            error: None,
        }
    }

    /// Failed answer with a default payload.
    #[must_use]
    pub fn failure(query: &Envelope, error: impl Into<String>) -> Self
    where
        R: Default,
    {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        Self {
            envelope: reply_envelope(query),
            payload: R::default(),
            success: false,
            error: Some(error),
        }
    }

    /// Consume into a `Result` over the payload.
    ///
    /// # Errors
    ///
    /// Returns the carried error message for failed responses.
    pub fn into_result(self) -> Result<R, String> {
        if self.success {
            Ok(self.payload)
        } else {
            Err(self.error.unwrap_or_default())
        }
    }
}

impl<R> Message for Response<R> {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

fn reply_envelope(query: &Envelope) -> Envelope {
    let mut envelope = Envelope::new(query.destination.unwrap_or(query.source));
    envelope.destination = Some(query.source);
    envelope.correlation_id = query.correlation_id.clone();
    envelope
}
