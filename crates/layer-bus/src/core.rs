//! # Bus Core
//!
//! Owns the handler registry and the query cache behind one lock and
//! drives every dispatch.
//!
//! ## Serialization Domain
//!
//! Registry and cache live in a single `BusState` behind a
//! `parking_lot::Mutex`. Critical sections are short lookups or inserts;
//! the lock is never held across an `.await`. Handler bodies run as
//! spawned tokio tasks, outside the lock, and may overlap freely with
//! each other and with new bus calls.
//!
//! ## Dispatch
//!
//! | Operation | Handlers | Routing violation | Handler failure |
//! |-----------|----------|-------------------|-----------------|
//! | `publish` | all matching, concurrent | counted, skipped when strict | isolated, excluded from count |
//! | `send` | exactly one, raced | `Err` | `Err(ExecutionFailed)` / `Err(Timeout)` |
//! | `query` | exactly one, raced, cached | `Err` when strict | failed `Response` |

use crate::cache::{derive_cache_key, CacheStatistics, QueryCache};
use crate::handler::{downcast_output, BoxFuture, CommandHandler, EventHandler, QueryHandler};
use crate::metrics::{BusCounter, BusMetrics, MetricsSink, MetricsSnapshot, TraceOutcome, TraceRecord};
use crate::registration::Registration;
use crate::registry::{
    query_type_name, HandlerRegistry, RegistrationId, RegistrationOptions, RegistryIntrospection,
};
use bus_types::{
    BusConfig, BusError, Command, Envelope, Event, LayerGraph, MessageKind, Query, Response,
    RoutingViolation,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::{type_name, Any};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

/// State guarded by the core's lock.
pub(crate) struct BusState {
    pub(crate) registry: HandlerRegistry,
    pub(crate) cache: QueryCache,
}

/// The dispatch engine behind [`crate::MessageBus`].
pub struct BusCore {
    state: Arc<Mutex<BusState>>,
    config: BusConfig,
    graph: LayerGraph,
    metrics: BusMetrics,
    sink: Arc<dyn MetricsSink>,
}

impl BusCore {
    pub fn new(config: BusConfig, graph: LayerGraph, sink: Arc<dyn MetricsSink>) -> Self {
        let state = BusState {
            registry: HandlerRegistry::new(),
            cache: QueryCache::new(config.cache_max_entries),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            config,
            graph,
            metrics: BusMetrics::new(),
            sink,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_event<T, H>(&self, handler: Arc<H>, options: RegistrationOptions) -> Registration
    where
        T: Clone + Send + Sync + 'static,
        H: EventHandler<T>,
    {
        let id = self.state.lock().registry.register_event::<T, H>(handler, options);
        self.registration(id, MessageKind::Event, type_name::<T>().to_string())
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `T` already has a live handler.
    pub fn register_command<T, H>(
        &self,
        handler: Arc<H>,
        options: RegistrationOptions,
    ) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        H: CommandHandler<T>,
    {
        let id = self
            .state
            .lock()
            .registry
            .register_command::<T, H>(handler, options)?;
        Ok(self.registration(id, MessageKind::Command, type_name::<T>().to_string()))
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `(T, R)` already has a live handler.
    pub fn register_query<T, R, H>(
        &self,
        handler: Arc<H>,
        options: RegistrationOptions,
    ) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        R: Send + 'static,
        H: QueryHandler<T, R>,
    {
        let id = self
            .state
            .lock()
            .registry
            .register_query::<T, R, H>(handler, options)?;
        Ok(self.registration(id, MessageKind::Query, query_type_name::<T, R>()))
    }

    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.state.lock().registry.unregister(id)
    }

    fn registration(&self, id: RegistrationId, kind: MessageKind, payload_type: String) -> Registration {
        Registration::new(id, kind, payload_type, Arc::downgrade(&self.state))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Fan an event out to every matching handler and wait for them.
    ///
    /// Returns the number of handlers that completed without error.
    /// Never fails: routing violations, handler errors, panics and
    /// timeouts are logged and counted.
    pub async fn publish<T>(&self, event: Event<T>) -> usize
    where
        T: Clone + Send + Sync + 'static,
    {
        let started = Instant::now();
        let payload_type = type_name::<T>();
        let kind = MessageKind::Event;
        self.count(BusCounter::Published, kind, payload_type, 1);

        if self.check_route(&event.envelope, kind, payload_type).is_err()
            && self.config.strict_routing_enforcement
        {
            self.trace(&event.envelope, kind, payload_type, 0, started, TraceOutcome::Rejected);
            return 0;
        }

        let targets = self
            .state
            .lock()
            .registry
            .event_targets::<T>(&self.graph, event.envelope.source, event.envelope.destination);
        let handler_count = targets.len();
        if self.config.enable_metrics {
            self.sink.record_handler_count(payload_type, handler_count);
        }
        if targets.is_empty() {
            debug!(message_id = %event.envelope.id, payload_type, "No event handlers registered");
            self.trace(
                &event.envelope,
                kind,
                payload_type,
                0,
                started,
                TraceOutcome::Delivered { handled: 0 },
            );
            return 0;
        }

        let event = Arc::new(event);
        let limit = self.config.event_handler_timeout;
        let mut tasks = JoinSet::new();
        let mut failed: u64 = 0;
        let mut timeouts: u64 = 0;

        for target in targets {
            let payload: &(dyn Any + Send + Sync) = event.as_ref();
            match (target.handler)(payload) {
                Ok(fut) => {
                    tasks.spawn(run_event_handler(target.id, target.handler_id, fut, limit));
                }
                Err(e) => {
                    failed += 1;
                    warn!(registration = %target.id, payload_type, error = %e, "Event handler rejected payload");
                }
            }
        }

        let mut handled = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, _, Ok(()))) => handled += 1,
                Ok((id, _, Err(BusError::HandlerDeallocated { handler }))) => {
                    debug!(registration = %id, handler = %handler, "Skipped deallocated event handler");
                }
                Ok((id, handler_id, Err(BusError::Timeout { timeout }))) => {
                    timeouts += 1;
                    warn!(
                        registration = %id,
                        handler_id = handler_id.as_deref().unwrap_or("-"),
                        payload_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "Event handler timed out"
                    );
                }
                Ok((id, handler_id, Err(e))) => {
                    failed += 1;
                    warn!(
                        registration = %id,
                        handler_id = handler_id.as_deref().unwrap_or("-"),
                        payload_type,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(join_error) => {
                    failed += 1;
                    error!(payload_type, reason = %panic_reason(join_error), "Event handler task aborted");
                }
            }
        }

        self.count(BusCounter::Processed, kind, payload_type, handled as u64);
        self.count(BusCounter::Errors, kind, payload_type, failed + timeouts);
        self.count(BusCounter::Timeouts, kind, payload_type, timeouts);
        self.observe(kind, payload_type, started.elapsed());

        debug!(
            message_id = %event.envelope.id,
            payload_type,
            handlers = handler_count,
            handled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Event published"
        );
        self.trace(
            &event.envelope,
            kind,
            payload_type,
            handler_count,
            started,
            TraceOutcome::Delivered { handled },
        );
        handled
    }

    /// Run the single command handler for `T` under a deadline.
    ///
    /// The deadline is the envelope's `timeout-ms` metadata when present,
    /// otherwise `default_command_timeout`.
    ///
    /// # Errors
    ///
    /// `RoutingViolation`, `NoHandlerRegistered`, `Timeout`,
    /// `ExecutionFailed`, or `TypeMismatch` when `O` is not the handler's
    /// output type. A mismatch is detected before the handler runs.
    pub async fn send<T, O>(&self, command: Command<T>) -> Result<O, BusError>
    where
        T: Send + 'static,
        O: Send + 'static,
    {
        let started = Instant::now();
        let payload_type = type_name::<T>();
        let kind = MessageKind::Command;
        let envelope = command.envelope.clone();
        self.count(BusCounter::Published, kind, payload_type, 1);

        if let Err(violation) = self.check_route(&envelope, kind, payload_type) {
            self.trace(&envelope, kind, payload_type, 0, started, TraceOutcome::Rejected);
            return Err(violation.into());
        }

        let handler = self.state.lock().registry.command_handler::<T, O>();
        let result = match handler {
            Ok(handler) => {
                let limit = envelope
                    .timeout_override()
                    .unwrap_or(self.config.default_command_timeout);
                let message: Box<dyn Any + Send> = Box::new(command);
                match handler(message) {
                    Ok(fut) => race(fut, limit).await.and_then(downcast_output::<O>),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        self.finish_request(&envelope, kind, payload_type, started, result.as_ref().err());
        result
    }

    /// Answer a query, from cache when allowed.
    ///
    /// Handler errors and timeouts come back as a failed `Response`.
    ///
    /// # Errors
    ///
    /// `RoutingViolation` under strict routing, `NoHandlerRegistered` on a
    /// cache miss with no handler, `TypeMismatch` on an internal type
    /// disagreement.
    pub async fn query<T, R>(&self, query: Query<T, R>) -> Result<Response<R>, BusError>
    where
        T: Serialize + Send + 'static,
        R: Clone + Default + Send + Sync + 'static,
    {
        let started = Instant::now();
        let payload_type = query_type_name::<T, R>();
        let kind = MessageKind::Query;
        let envelope = query.envelope.clone();
        self.count(BusCounter::Published, kind, &payload_type, 1);

        if let Err(violation) = self.check_route(&envelope, kind, &payload_type) {
            if self.config.strict_routing_enforcement {
                self.trace(&envelope, kind, &payload_type, 0, started, TraceOutcome::Rejected);
                return Err(violation.into());
            }
        }

        let cache_key = if query.cacheable {
            match &query.cache_key {
                Some(key) => Some(key.clone()),
                None => match derive_cache_key::<T, R>(&query.payload, envelope.destination) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(payload_type = %payload_type, error = %e, "Query payload not serializable, bypassing cache");
                        None
                    }
                },
            }
        } else {
            None
        };

        if let Some(key) = &cache_key {
            let cached = self.state.lock().cache.get::<R>(key);
            if let Some(response) = cached {
                self.count(BusCounter::CacheHits, kind, &payload_type, 1);
                self.count(BusCounter::Processed, kind, &payload_type, 1);
                self.observe(kind, &payload_type, started.elapsed());
                debug!(message_id = %envelope.id, payload_type = %payload_type, "Query served from cache");
                self.trace(&envelope, kind, &payload_type, 0, started, TraceOutcome::CacheHit);
                return Ok(response);
            }
            self.count(BusCounter::CacheMisses, kind, &payload_type, 1);
        }

        let handler = self.state.lock().registry.query_handler::<T, R>();
        let Some(handler) = handler else {
            let err = BusError::no_handler(kind, payload_type.clone());
            self.finish_request(&envelope, kind, &payload_type, started, Some(&err));
            return Err(err);
        };

        let limit = query.timeout.unwrap_or(self.config.default_query_timeout);
        let ttl = query.cache_ttl.unwrap_or(self.config.default_cache_ttl);
        let message: Box<dyn Any + Send> = Box::new(query);
        let outcome = match handler(message) {
            Ok(fut) => race(fut, limit).await.and_then(downcast_output::<R>),
            Err(e) => Err(e),
        };

        self.finish_request(&envelope, kind, &payload_type, started, outcome.as_ref().err());
        let response = match outcome {
            Ok(payload) => Response::success(&envelope, payload),
            Err(e @ BusError::TypeMismatch { .. }) => return Err(e),
            Err(BusError::Timeout { timeout }) => {
                return Ok(Response::failure(
                    &envelope,
                    format!("query timed out after {}ms", timeout.as_millis()),
                ));
            }
            Err(BusError::ExecutionFailed { reason }) => {
                return Ok(Response::failure(&envelope, reason));
            }
            Err(other) => return Ok(Response::failure(&envelope, other.to_string())),
        };

        if let Some(key) = cache_key {
            self.state.lock().cache.set(key, response.clone(), ttl);
        }
        Ok(response)
    }

    // ------------------------------------------------------------------
    // Diagnostics & administration
    // ------------------------------------------------------------------

    pub fn introspect(&self) -> RegistryIntrospection {
        self.state.lock().registry.introspect()
    }

    pub fn cleanup_deallocated(&self) -> usize {
        self.state.lock().registry.cleanup_deallocated()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.state.lock().cache.statistics()
    }

    pub fn invalidate_cache(&self, key: &str) -> bool {
        self.state.lock().cache.invalidate(key)
    }

    pub fn invalidate_all_cache(&self) {
        self.state.lock().cache.invalidate_all();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Validate `source -> destination`, honoring bypass when allowed.
    /// Violations are counted and logged here; the caller picks the policy.
    fn check_route(
        &self,
        envelope: &Envelope,
        kind: MessageKind,
        payload_type: &str,
    ) -> Result<(), RoutingViolation> {
        let Err(violation) = self.graph.check(envelope.source, envelope.destination) else {
            return Ok(());
        };

        if self.config.allow_routing_bypass && envelope.requests_bypass() {
            debug!(
                message_id = %envelope.id,
                kind = %kind,
                source = %violation.from,
                destination = %violation.to,
                "Routing bypass honored"
            );
            return Ok(());
        }

        self.count(BusCounter::RoutingViolations, kind, payload_type, 1);
        warn!(
            message_id = %envelope.id,
            kind = %kind,
            payload_type,
            source = %violation.from,
            destination = %violation.to,
            strict = self.config.strict_routing_enforcement,
            "Routing violation"
        );
        Err(violation)
    }

    /// Record the outcome of a command or query handler call.
    fn finish_request(
        &self,
        envelope: &Envelope,
        kind: MessageKind,
        payload_type: &str,
        started: Instant,
        error: Option<&BusError>,
    ) {
        let outcome = match error {
            None => {
                self.count(BusCounter::Processed, kind, payload_type, 1);
                self.observe(kind, payload_type, started.elapsed());
                TraceOutcome::Completed
            }
            Some(BusError::Timeout { timeout }) => {
                self.count(BusCounter::Timeouts, kind, payload_type, 1);
                self.count(BusCounter::Errors, kind, payload_type, 1);
                warn!(
                    message_id = %envelope.id,
                    kind = %kind,
                    payload_type,
                    timeout_ms = timeout.as_millis() as u64,
                    "Handler timed out"
                );
                TraceOutcome::TimedOut
            }
            Some(e) => {
                self.count(BusCounter::Errors, kind, payload_type, 1);
                warn!(message_id = %envelope.id, kind = %kind, payload_type, error = %e, "Handler call failed");
                TraceOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        let handler_count = usize::from(!matches!(error, Some(BusError::NoHandlerRegistered { .. })));
        self.trace(envelope, kind, payload_type, handler_count, started, outcome);
    }

    fn count(&self, counter: BusCounter, kind: MessageKind, payload_type: &str, amount: u64) {
        if !self.config.enable_metrics || amount == 0 {
            return;
        }
        self.metrics.add(counter, amount);
        self.sink.increment(counter, kind, payload_type, amount);
    }

    fn observe(&self, kind: MessageKind, payload_type: &str, latency: Duration) {
        if !self.config.enable_metrics {
            return;
        }
        self.metrics.add_latency(latency);
        self.sink.observe_latency(kind, payload_type, latency);
    }

    fn trace(
        &self,
        envelope: &Envelope,
        kind: MessageKind,
        payload_type: &str,
        handler_count: usize,
        started: Instant,
        outcome: TraceOutcome,
    ) {
        if !self.config.enable_tracing {
            return;
        }
        let record = TraceRecord {
            message_id: envelope.id,
            correlation_id: envelope.correlation_id.clone(),
            kind,
            payload_type: payload_type.to_string(),
            handler_count,
            duration: started.elapsed(),
            outcome,
        };
        debug!(
            message_id = %record.message_id,
            correlation_id = %record.correlation_id,
            kind = %kind,
            payload_type,
            handlers = handler_count,
            elapsed_ms = record.duration.as_millis() as u64,
            outcome = ?record.outcome,
            "Bus trace"
        );
        self.sink.record_trace(&record);
    }
}

/// Aborts the wrapped task when dropped, so a cancelled caller or an
/// elapsed deadline never leaves the handler running.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Race a handler future against `limit`. The loser is cancelled.
async fn race<O>(fut: BoxFuture<Result<O, BusError>>, limit: Duration) -> Result<O, BusError>
where
    O: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(fut));
    match timeout(limit, &mut task.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(BusError::ExecutionFailed {
            reason: panic_reason(join_error),
        }),
        Err(_) => Err(BusError::Timeout { timeout: limit }),
    }
}

async fn run_event_handler(
    id: RegistrationId,
    handler_id: Option<String>,
    fut: BoxFuture<Result<(), BusError>>,
    limit: Option<Duration>,
) -> (RegistrationId, Option<String>, Result<(), BusError>) {
    let result = match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(BusError::Timeout { timeout: limit })),
        None => fut.await,
    };
    (id, handler_id, result)
}

fn panic_reason(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            format!("handler panicked: {message}")
        }
        Err(_) => "handler task cancelled".to_string(),
    }
}
