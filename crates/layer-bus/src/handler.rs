//! # Handlers
//!
//! Typed handler traits for each message kind, closure adapters, and the
//! type-erased forms the registry stores.
//!
//! ## Type Erasure
//!
//! The registry holds handlers for many payload types in one map, so each
//! handler is wrapped in a closure over `dyn Any`. The payload type is
//! fixed at registration by the generic signature; the closure downcasts
//! again at dispatch and reports `BusError::TypeMismatch` if the stored
//! handler and the message ever disagree.

use async_trait::async_trait;
use bus_types::{BusError, Command, Event, HandlerResult, Query};
use std::any::{type_name, Any};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Weak};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Type-erased handler output.
pub(crate) type AnyOutput = Box<dyn Any + Send>;

pub(crate) type ErasedEventHandler = Arc<
    dyn Fn(&(dyn Any + Send + Sync)) -> Result<BoxFuture<Result<(), BusError>>, BusError>
        + Send
        + Sync,
>;

pub(crate) type ErasedRequestHandler = Arc<
    dyn Fn(Box<dyn Any + Send>) -> Result<BoxFuture<Result<AnyOutput, BusError>>, BusError>
        + Send
        + Sync,
>;

/// Handles events of payload type `T`. Any number may be registered.
#[async_trait]
pub trait EventHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle(&self, event: Event<T>) -> HandlerResult<()>;
}

/// Handles commands of payload type `T`. At most one per `T`.
#[async_trait]
pub trait CommandHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Result returned to the sender.
    type Output: Send + 'static;

    async fn handle(&self, command: Command<T>) -> HandlerResult<Self::Output>;
}

/// Answers queries of payload type `T` with `R`. At most one per `(T, R)`.
#[async_trait]
pub trait QueryHandler<T, R>: Send + Sync + 'static
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn handle(&self, query: Query<T, R>) -> HandlerResult<R>;
}

/// Adapts an async closure into an `EventHandler`.
pub struct FnEventHandler<F>(pub F);

#[async_trait]
impl<T, F, Fut> EventHandler<T> for FnEventHandler<F>
where
    T: Send + 'static,
    F: Fn(Event<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn handle(&self, event: Event<T>) -> HandlerResult<()> {
        (self.0)(event).await
    }
}

/// Adapts an async closure into a `CommandHandler` with output `O`.
pub struct FnCommandHandler<F, O> {
    f: F,
    _output: PhantomData<fn() -> O>,
}

impl<F, O> FnCommandHandler<F, O> {
    pub fn new<T, Fut>(f: F) -> Self
    where
        F: Fn(Command<T>) -> Fut,
        Fut: Future<Output = HandlerResult<O>>,
    {
        Self {
            f,
            _output: PhantomData,
        }
    }
}

#[async_trait]
impl<T, O, F, Fut> CommandHandler<T> for FnCommandHandler<F, O>
where
    T: Send + 'static,
    O: Send + 'static,
    F: Fn(Command<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<O>> + Send + 'static,
{
    type Output = O;

    async fn handle(&self, command: Command<T>) -> HandlerResult<O> {
        (self.f)(command).await
    }
}

/// Adapts an async closure into a `QueryHandler`.
pub struct FnQueryHandler<F>(pub F);

#[async_trait]
impl<T, R, F, Fut> QueryHandler<T, R> for FnQueryHandler<F>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(Query<T, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    async fn handle(&self, query: Query<T, R>) -> HandlerResult<R> {
        (self.0)(query).await
    }
}

/// Event handler bound to the lifetime of an owner.
///
/// The owner is held weakly. Once it is dropped the handler reports
/// `HandlerDeallocated`, which the bus treats as a silent skip.
pub struct WeakEventHandler<O, F> {
    owner: Weak<O>,
    f: F,
}

impl<O, F> WeakEventHandler<O, F> {
    pub fn new<T, Fut>(owner: &Arc<O>, f: F) -> Self
    where
        F: Fn(Arc<O>, Event<T>) -> Fut,
        Fut: Future<Output = HandlerResult<()>>,
    {
        Self {
            owner: Arc::downgrade(owner),
            f,
        }
    }
}

#[async_trait]
impl<T, O, F, Fut> EventHandler<T> for WeakEventHandler<O, F>
where
    T: Send + 'static,
    O: Send + Sync + 'static,
    F: Fn(Arc<O>, Event<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn handle(&self, event: Event<T>) -> HandlerResult<()> {
        let Some(owner) = self.owner.upgrade() else {
            return Err(Box::new(BusError::HandlerDeallocated {
                handler: type_name::<O>().to_string(),
            }));
        };
        (self.f)(owner, event).await
    }
}

pub(crate) fn erase_event<T, H>(handler: Arc<H>) -> ErasedEventHandler
where
    T: Clone + Send + Sync + 'static,
    H: EventHandler<T>,
{
    Arc::new(move |event: &(dyn Any + Send + Sync)| {
        let event = event
            .downcast_ref::<Event<T>>()
            .ok_or_else(|| BusError::type_mismatch(type_name::<Event<T>>()))?
            .clone();
        let handler = Arc::clone(&handler);
        let fut: BoxFuture<Result<(), BusError>> = Box::pin(async move {
            handler
                .handle(event)
                .await
                .map_err(BusError::from_handler_error)
        });
        Ok(fut)
    })
}

pub(crate) fn erase_command<T, H>(handler: Arc<H>) -> ErasedRequestHandler
where
    T: Send + 'static,
    H: CommandHandler<T>,
{
    Arc::new(move |command: Box<dyn Any + Send>| {
        let command = command
            .downcast::<Command<T>>()
            .map_err(|_| BusError::type_mismatch(type_name::<Command<T>>()))?;
        let handler = Arc::clone(&handler);
        let fut: BoxFuture<Result<AnyOutput, BusError>> = Box::pin(async move {
            match handler.handle(*command).await {
                Ok(output) => Ok(Box::new(output) as AnyOutput),
                Err(e) => Err(BusError::from_handler_error(e)),
            }
        });
        Ok(fut)
    })
}

pub(crate) fn erase_query<T, R, H>(handler: Arc<H>) -> ErasedRequestHandler
where
    T: Send + 'static,
    R: Send + 'static,
    H: QueryHandler<T, R>,
{
    Arc::new(move |query: Box<dyn Any + Send>| {
        let query = query
            .downcast::<Query<T, R>>()
            .map_err(|_| BusError::type_mismatch(type_name::<Query<T, R>>()))?;
        let handler = Arc::clone(&handler);
        let fut: BoxFuture<Result<AnyOutput, BusError>> = Box::pin(async move {
            match handler.handle(*query).await {
                Ok(output) => Ok(Box::new(output) as AnyOutput),
                Err(e) => Err(BusError::from_handler_error(e)),
            }
        });
        Ok(fut)
    })
}

/// Recover a typed value from an erased handler output.
pub(crate) fn downcast_output<O: 'static>(output: AnyOutput) -> Result<O, BusError> {
    output
        .downcast::<O>()
        .map(|boxed| *boxed)
        .map_err(|_| BusError::type_mismatch(type_name::<O>()))
}
