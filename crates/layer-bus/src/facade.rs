//! # Message Bus Facade
//!
//! The API application code talks to. Everything delegates to
//! [`BusCore`]; this layer only adds closure conveniences and a builder.
//!
//! ```ignore
//! let bus = MessageBus::new();
//!
//! let _sub = bus.subscribe_fn(|event: Event<UserCreated>| async move {
//!     println!("welcome {}", event.payload.name);
//!     Ok(())
//! });
//!
//! bus.handle_command_fn(|cmd: Command<CreateUser>| async move {
//!     Ok(cmd.payload.name.len())
//! })?;
//!
//! let id: usize = bus.send(Command::new(Layer::Presentation, create).to(Layer::Application)).await?;
//! ```

use crate::cache::CacheStatistics;
use crate::core::BusCore;
use crate::handler::{
    CommandHandler, EventHandler, FnCommandHandler, FnEventHandler, FnQueryHandler, QueryHandler,
    WeakEventHandler,
};
use crate::metrics::{MetricsSink, MetricsSnapshot, NoopSink};
use crate::registration::Registration;
use crate::registry::{Liveness, RegistrationId, RegistrationOptions, RegistryIntrospection};
use bus_types::{
    BusConfig, BusError, Command, ConfigError, Event, HandlerResult, LayerGraph, Query, Response,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Cloneable handle to one bus instance.
#[derive(Clone)]
pub struct MessageBus {
    core: Arc<BusCore>,
}

impl MessageBus {
    /// Bus with default configuration and no metrics sink.
    #[must_use]
    pub fn new() -> Self {
        Self::from_core(BusCore::new(
            BusConfig::default(),
            LayerGraph::STANDARD,
            Arc::new(NoopSink),
        ))
    }

    #[must_use]
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::default()
    }

    fn from_core(core: BusCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    // --- events -------------------------------------------------------

    pub fn subscribe<T, H>(&self, handler: H) -> Registration
    where
        T: Clone + Send + Sync + 'static,
        H: EventHandler<T>,
    {
        self.subscribe_with::<T, _>(handler, RegistrationOptions::default())
    }

    pub fn subscribe_fn<T, F, Fut>(&self, f: F) -> Registration
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Event<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        self.subscribe::<T, _>(FnEventHandler(f))
    }

    pub fn subscribe_with<T, H>(&self, handler: H, options: RegistrationOptions) -> Registration
    where
        T: Clone + Send + Sync + 'static,
        H: EventHandler<T>,
    {
        self.core.register_event::<T, H>(Arc::new(handler), options)
    }

    /// Subscribe a handler that lives only as long as `owner`.
    ///
    /// The owner is held weakly. Once it is dropped, deliveries are skipped
    /// and the registration is purged on the next publish of `T`.
    pub fn subscribe_weak<T, O, F, Fut>(&self, owner: &Arc<O>, f: F) -> Registration
    where
        T: Clone + Send + Sync + 'static,
        O: Send + Sync + 'static,
        F: Fn(Arc<O>, Event<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<()>> + Send + 'static,
    {
        let options = RegistrationOptions::new().with_liveness(Liveness::tied_to(owner));
        self.subscribe_with::<T, _>(WeakEventHandler::new(owner, f), options)
    }

    // --- commands -----------------------------------------------------

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `T` already has a handler.
    pub fn handle_command<T, H>(&self, handler: H) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        H: CommandHandler<T>,
    {
        self.handle_command_with::<T, _>(handler, RegistrationOptions::default())
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `T` already has a handler.
    pub fn handle_command_fn<T, O, F, Fut>(&self, f: F) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        O: Send + 'static,
        F: Fn(Command<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<O>> + Send + 'static,
    {
        self.handle_command::<T, _>(FnCommandHandler::new(f))
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `T` already has a handler.
    pub fn handle_command_with<T, H>(
        &self,
        handler: H,
        options: RegistrationOptions,
    ) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        H: CommandHandler<T>,
    {
        self.core.register_command::<T, H>(Arc::new(handler), options)
    }

    // --- queries ------------------------------------------------------

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `(T, R)` already has a handler.
    pub fn handle_query<T, R, H>(&self, handler: H) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        R: Send + 'static,
        H: QueryHandler<T, R>,
    {
        self.handle_query_with::<T, R, _>(handler, RegistrationOptions::default())
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `(T, R)` already has a handler.
    pub fn handle_query_fn<T, R, F, Fut>(&self, f: F) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Query<T, R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        self.handle_query::<T, R, _>(FnQueryHandler(f))
    }

    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if `(T, R)` already has a handler.
    pub fn handle_query_with<T, R, H>(
        &self,
        handler: H,
        options: RegistrationOptions,
    ) -> Result<Registration, BusError>
    where
        T: Send + 'static,
        R: Send + 'static,
        H: QueryHandler<T, R>,
    {
        self.core.register_query::<T, R, H>(Arc::new(handler), options)
    }

    /// Remove a registration by id. Returns `false` if it was already gone.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        self.core.unregister(id)
    }

    // --- invocation ---------------------------------------------------

    /// See [`BusCore::publish`].
    pub async fn publish<T>(&self, event: Event<T>) -> usize
    where
        T: Clone + Send + Sync + 'static,
    {
        self.core.publish(event).await
    }

    /// See [`BusCore::send`].
    ///
    /// # Errors
    ///
    /// See [`BusCore::send`].
    pub async fn send<T, O>(&self, command: Command<T>) -> Result<O, BusError>
    where
        T: Send + 'static,
        O: Send + 'static,
    {
        self.core.send(command).await
    }

    /// See [`BusCore::query`].
    ///
    /// # Errors
    ///
    /// See [`BusCore::query`].
    pub async fn query<T, R>(&self, query: Query<T, R>) -> Result<Response<R>, BusError>
    where
        T: Serialize + Send + 'static,
        R: Clone + Default + Send + Sync + 'static,
    {
        self.core.query(query).await
    }

    // --- diagnostics --------------------------------------------------

    #[must_use]
    pub fn introspect(&self) -> RegistryIntrospection {
        self.core.introspect()
    }

    /// Drop every registration whose owner is gone.
    pub fn cleanup_deallocated(&self) -> usize {
        self.core.cleanup_deallocated()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics()
    }

    #[must_use]
    pub fn cache_statistics(&self) -> CacheStatistics {
        self.core.cache_statistics()
    }

    pub fn invalidate_cache(&self, key: &str) -> bool {
        self.core.invalidate_cache(key)
    }

    pub fn invalidate_all_cache(&self) {
        self.core.invalidate_all_cache();
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        self.core.config()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MessageBus`].
#[derive(Default)]
pub struct MessageBusBuilder {
    config: BusConfig,
    graph: Option<LayerGraph>,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl MessageBusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the standard routing policy.
    #[must_use]
    pub fn layer_graph(mut self, graph: LayerGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    #[must_use]
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and create the bus.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a timeout, TTL or capacity is zero.
    pub fn build(self) -> Result<MessageBus, ConfigError> {
        self.config.validate()?;
        info!(
            strict_routing = self.config.strict_routing_enforcement,
            allow_bypass = self.config.allow_routing_bypass,
            cache_max_entries = self.config.cache_max_entries,
            "Message bus created"
        );
        Ok(MessageBus::from_core(BusCore::new(
            self.config,
            self.graph.unwrap_or_default(),
            self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
        )))
    }
}
