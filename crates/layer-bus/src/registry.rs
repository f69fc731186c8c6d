//! # Handler Registry
//!
//! Type-indexed handler storage.
//!
//! ## Multiplicity
//!
//! | Kind | Key | Handlers per key |
//! |------|-----|------------------|
//! | Event | `TypeId` of `T` | any number |
//! | Command | `TypeId` of `T` | exactly one |
//! | Query | `(TypeId of T, TypeId of R)` | exactly one |
//!
//! The registry itself is not synchronized. The bus core owns it behind
//! its state lock; nothing else mutates it.
//!
//! ## Liveness
//!
//! A registration may carry a `Liveness` predicate. Entries whose owner is
//! gone are purged lazily on the next lookup for their key, or eagerly by
//! `cleanup_deallocated`.

use crate::handler::{
    erase_command, erase_event, erase_query, CommandHandler, ErasedEventHandler,
    ErasedRequestHandler, EventHandler, QueryHandler,
};
use bus_types::{BusError, Layer, LayerGraph, MessageKind};
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Identifier of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg-{}", self.0)
    }
}

/// Is-alive predicate for handlers tied to an external object.
#[derive(Clone)]
pub struct Liveness(Arc<dyn Fn() -> bool + Send + Sync>);

impl Liveness {
    /// Wrap an arbitrary predicate.
    ///
    /// The predicate runs while the bus holds its state lock, which is not
    /// reentrant. It must not call back into the bus or it deadlocks.
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(check))
    }

    /// Alive while `owner` has strong references.
    pub fn tied_to<O: Send + Sync + 'static>(owner: &Arc<O>) -> Self {
        let weak: Weak<O> = Arc::downgrade(owner);
        Self::new(move || weak.strong_count() > 0)
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        (self.0)()
    }
}

impl fmt::Debug for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Liveness").field(&self.is_alive()).finish()
    }
}

/// Optional knobs for a registration.
///
/// `priority` and `accepted_layers` only affect event dispatch.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Caller-chosen label. Duplicates are allowed for events but logged.
    pub handler_id: Option<String>,
    /// Higher priorities are dispatched first.
    pub priority: i32,
    /// Destination layers this handler accepts. `None` accepts all.
    pub accepted_layers: Option<Vec<Layer>>,
    /// Drop the registration once this reports dead.
    pub liveness: Option<Liveness>,
}

impl RegistrationOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handler_id(mut self, handler_id: impl Into<String>) -> Self {
        self.handler_id = Some(handler_id.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn accepting(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.accepted_layers = Some(layers.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    fn is_alive(&self) -> bool {
        self.liveness.as_ref().map_or(true, Liveness::is_alive)
    }
}

/// Snapshot of what is registered, for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryIntrospection {
    pub event_types: Vec<String>,
    pub command_types: Vec<String>,
    /// Formatted as `"T -> R"`.
    pub query_types: Vec<String>,
    /// Total number of live registrations across all kinds.
    pub total_count: usize,
}

/// Event handler selected for one dispatch.
pub(crate) struct EventTarget {
    pub id: RegistrationId,
    pub handler_id: Option<String>,
    pub handler: ErasedEventHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RegistrationKey {
    Event(TypeId),
    Command(TypeId),
    Query(TypeId, TypeId),
}

struct EventEntry {
    id: RegistrationId,
    options: RegistrationOptions,
    handler: ErasedEventHandler,
}

struct EventSlot {
    payload_type: &'static str,
    entries: Vec<EventEntry>,
}

struct RequestEntry {
    id: RegistrationId,
    payload_type: String,
    /// `TypeId` of the value the handler produces.
    output: TypeId,
    options: RegistrationOptions,
    handler: ErasedRequestHandler,
}

/// Type-indexed handler storage.
#[derive(Default)]
pub struct HandlerRegistry {
    events: HashMap<TypeId, EventSlot>,
    commands: HashMap<TypeId, RequestEntry>,
    queries: HashMap<(TypeId, TypeId), RequestEntry>,
    index: HashMap<RegistrationId, RegistrationKey>,
    next_id: u64,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> RegistrationId {
        self.next_id += 1;
        RegistrationId(self.next_id)
    }

    /// Append an event handler for `T`.
    pub fn register_event<T, H>(&mut self, handler: Arc<H>, options: RegistrationOptions) -> RegistrationId
    where
        T: Clone + Send + Sync + 'static,
        H: EventHandler<T>,
    {
        let key = TypeId::of::<T>();
        let id = self.allocate_id();
        let slot = self.events.entry(key).or_insert_with(|| EventSlot {
            payload_type: type_name::<T>(),
            entries: Vec::new(),
        });

        if let Some(handler_id) = &options.handler_id {
            let duplicate = slot
                .entries
                .iter()
                .any(|e| e.options.handler_id.as_ref() == Some(handler_id));
            if duplicate {
                warn!(
                    handler_id = %handler_id,
                    payload_type = slot.payload_type,
                    "Duplicate event handler id registered"
                );
            }
        }

        slot.entries.push(EventEntry {
            id,
            options,
            handler: erase_event::<T, H>(handler),
        });
        self.index.insert(id, RegistrationKey::Event(key));
        debug!(%id, payload_type = type_name::<T>(), "Event handler registered");
        id
    }

    /// Occupy the command slot for `T`.
    ///
    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if a live handler already holds the slot.
    pub fn register_command<T, H>(
        &mut self,
        handler: Arc<H>,
        options: RegistrationOptions,
    ) -> Result<RegistrationId, BusError>
    where
        T: Send + 'static,
        H: CommandHandler<T>,
    {
        let key = TypeId::of::<T>();
        self.purge_dead_command(key);
        if self.commands.contains_key(&key) {
            return Err(BusError::already_registered(
                MessageKind::Command,
                type_name::<T>(),
            ));
        }

        let id = self.allocate_id();
        self.commands.insert(
            key,
            RequestEntry {
                id,
                payload_type: type_name::<T>().to_string(),
                output: TypeId::of::<H::Output>(),
                options,
                handler: erase_command::<T, H>(handler),
            },
        );
        self.index.insert(id, RegistrationKey::Command(key));
        debug!(%id, payload_type = type_name::<T>(), "Command handler registered");
        Ok(id)
    }

    /// Occupy the query slot for `(T, R)`.
    ///
    /// # Errors
    ///
    /// `HandlerAlreadyRegistered` if a live handler already holds the slot.
    pub fn register_query<T, R, H>(
        &mut self,
        handler: Arc<H>,
        options: RegistrationOptions,
    ) -> Result<RegistrationId, BusError>
    where
        T: Send + 'static,
        R: Send + 'static,
        H: QueryHandler<T, R>,
    {
        let key = (TypeId::of::<T>(), TypeId::of::<R>());
        let payload_type = query_type_name::<T, R>();
        self.purge_dead_query(key);
        if self.queries.contains_key(&key) {
            return Err(BusError::already_registered(MessageKind::Query, payload_type));
        }

        let id = self.allocate_id();
        debug!(%id, payload_type = %payload_type, "Query handler registered");
        self.queries.insert(
            key,
            RequestEntry {
                id,
                payload_type,
                output: key.1,
                options,
                handler: erase_query::<T, R, H>(handler),
            },
        );
        self.index.insert(id, RegistrationKey::Query(key.0, key.1));
        Ok(id)
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unregister(&mut self, id: RegistrationId) -> bool {
        let Some(key) = self.index.remove(&id) else {
            return false;
        };

        let removed = match key {
            RegistrationKey::Event(type_id) => {
                let Some(slot) = self.events.get_mut(&type_id) else {
                    return false;
                };
                let before = slot.entries.len();
                slot.entries.retain(|e| e.id != id);
                let removed = slot.entries.len() != before;
                if slot.entries.is_empty() {
                    self.events.remove(&type_id);
                }
                removed
            }
            RegistrationKey::Command(type_id) => {
                remove_if_id(&mut self.commands, &type_id, id)
            }
            RegistrationKey::Query(t, r) => remove_if_id(&mut self.queries, &(t, r), id),
        };

        if removed {
            debug!(%id, "Handler unregistered");
        }
        removed
    }

    /// Handlers for an event of type `T`, ordered by descending priority.
    ///
    /// Dead entries for `T` are purged first. With a destination, a
    /// handler must accept that layer. Without one (broadcast), a handler
    /// with an accepted-layer set must accept some layer `graph` lets
    /// `source` reach.
    pub(crate) fn event_targets<T: 'static>(
        &mut self,
        graph: &LayerGraph,
        source: Layer,
        destination: Option<Layer>,
    ) -> Vec<EventTarget> {
        let key = TypeId::of::<T>();
        self.purge_dead_events(key);

        let Some(slot) = self.events.get(&key) else {
            return Vec::new();
        };

        let mut matching: Vec<&EventEntry> = slot
            .entries
            .iter()
            .filter(|entry| match (&entry.options.accepted_layers, destination) {
                (None, _) => true,
                (Some(accepted), Some(destination)) => accepted.contains(&destination),
                (Some(accepted), None) => graph.reaches_any(source, accepted),
            })
            .collect();
        // Stable sort keeps registration order among equal priorities.
        matching.sort_by(|a, b| b.options.priority.cmp(&a.options.priority));

        matching
            .into_iter()
            .map(|entry| EventTarget {
                id: entry.id,
                handler_id: entry.options.handler_id.clone(),
                handler: Arc::clone(&entry.handler),
            })
            .collect()
    }

    /// The command handler for `T`, checked to produce `O`.
    ///
    /// # Errors
    ///
    /// `NoHandlerRegistered` if the slot is empty or dead, `TypeMismatch`
    /// if the handler's output is not `O`. Nothing is invoked either way.
    pub(crate) fn command_handler<T: 'static, O: 'static>(
        &mut self,
    ) -> Result<ErasedRequestHandler, BusError> {
        let key = TypeId::of::<T>();
        self.purge_dead_command(key);
        let entry = self
            .commands
            .get(&key)
            .ok_or_else(|| BusError::no_handler(MessageKind::Command, type_name::<T>()))?;
        if entry.output != TypeId::of::<O>() {
            return Err(BusError::type_mismatch(type_name::<O>()));
        }
        Ok(Arc::clone(&entry.handler))
    }

    /// The query handler for `(T, R)`, if registered and alive.
    pub(crate) fn query_handler<T: 'static, R: 'static>(&mut self) -> Option<ErasedRequestHandler> {
        let key = (TypeId::of::<T>(), TypeId::of::<R>());
        self.purge_dead_query(key);
        self.queries.get(&key).map(|e| Arc::clone(&e.handler))
    }

    /// Number of event handlers currently registered for `T`.
    #[must_use]
    pub fn event_handler_count<T: 'static>(&self) -> usize {
        self.events
            .get(&TypeId::of::<T>())
            .map_or(0, |slot| slot.entries.len())
    }

    #[must_use]
    pub fn has_command_handler<T: 'static>(&self) -> bool {
        self.commands.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn has_query_handler<T: 'static, R: 'static>(&self) -> bool {
        self.queries
            .contains_key(&(TypeId::of::<T>(), TypeId::of::<R>()))
    }

    /// Drop every registration whose liveness check fails.
    /// Returns the number removed.
    pub fn cleanup_deallocated(&mut self) -> usize {
        let dead: Vec<RegistrationId> = self
            .events
            .values()
            .flat_map(|slot| slot.entries.iter())
            .filter(|e| !e.options.is_alive())
            .map(|e| e.id)
            .chain(
                self.commands
                    .values()
                    .chain(self.queries.values())
                    .filter(|e| !e.options.is_alive())
                    .map(|e| e.id),
            )
            .collect();

        let removed = dead.into_iter().filter(|id| self.unregister(*id)).count();
        if removed > 0 {
            debug!(removed, "Purged deallocated handlers");
        }
        removed
    }

    /// Total number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Registered payload types, sorted.
    #[must_use]
    pub fn introspect(&self) -> RegistryIntrospection {
        let mut event_types: Vec<String> = self
            .events
            .values()
            .map(|slot| slot.payload_type.to_string())
            .collect();
        let mut command_types: Vec<String> =
            self.commands.values().map(|e| e.payload_type.clone()).collect();
        let mut query_types: Vec<String> =
            self.queries.values().map(|e| e.payload_type.clone()).collect();
        event_types.sort();
        command_types.sort();
        query_types.sort();

        RegistryIntrospection {
            event_types,
            command_types,
            query_types,
            total_count: self.len(),
        }
    }

    fn purge_dead_events(&mut self, key: TypeId) {
        let Some(slot) = self.events.get(&key) else {
            return;
        };
        let dead: Vec<RegistrationId> = slot
            .entries
            .iter()
            .filter(|e| !e.options.is_alive())
            .map(|e| e.id)
            .collect();
        for id in dead {
            debug!(%id, "Dropping deallocated event handler");
            self.unregister(id);
        }
    }

    fn purge_dead_command(&mut self, key: TypeId) {
        let dead = self
            .commands
            .get(&key)
            .filter(|e| !e.options.is_alive())
            .map(|e| e.id);
        if let Some(id) = dead {
            debug!(%id, "Dropping deallocated command handler");
            self.unregister(id);
        }
    }

    fn purge_dead_query(&mut self, key: (TypeId, TypeId)) {
        let dead = self
            .queries
            .get(&key)
            .filter(|e| !e.options.is_alive())
            .map(|e| e.id);
        if let Some(id) = dead {
            debug!(%id, "Dropping deallocated query handler");
            self.unregister(id);
        }
    }
}

fn remove_if_id<K: std::hash::Hash + Eq>(
    map: &mut HashMap<K, RequestEntry>,
    key: &K,
    id: RegistrationId,
) -> bool {
    if map.get(key).is_some_and(|e| e.id == id) {
        map.remove(key);
        return true;
    }
    false
}

pub(crate) fn query_type_name<T, R>() -> String {
    format!("{} -> {}", type_name::<T>(), type_name::<R>())
}
