//! The entity identity map.
//!
//! Entities are objects with a stable protocol-level `id`. Every time an entity
//! is read from a response it is merged into the [`IdentityMap`] of the client
//! session, so all results that mention the same id share one [`EntityRef`].
//!
//! An entity is registered under its concrete type and under each of its
//! declared ancestor types. [`EntityManager`]s observe one of those type names
//! and receive added, removed and updated events for every matching entity.

use std::any::Any;
use std::borrow::Borrow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::ops::Deref;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use parking_lot::RwLock;
use parking_lot::RwLockReadGuard;
use serde::de::DeserializeOwned;
use serde::de::Error as _;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::EntityError;
use crate::json_ext::value_kind;
use crate::json_ext::Object;
use crate::json_ext::ObjectExt;
use crate::json_ext::Value;
use crate::schema::GraphType;

/// A protocol-level identifier, carried as plain text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Id(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Id {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Id {
    fn from(id: &str) -> Self {
        Id(id.to_string())
    }
}

impl From<String> for Id {
    fn from(id: String) -> Self {
        Id(id)
    }
}

impl GraphType for Id {
    const TYPE_NAME: &'static str = "ID";
}

/// A generated type with an identity.
pub trait Entity: GraphType + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Declared ancestor type names, nearest first. The base entity type is
    /// not listed.
    const ANCESTORS: &'static [&'static str] = &[];

    fn id(&self) -> &Id;
}

/// The shared storage behind an [`EntityRef`].
#[derive(Debug)]
pub struct EntityCell<T> {
    id: Id,
    state: RwLock<T>,
    updated_at: Mutex<SystemTime>,
}

impl<T> EntityCell<T> {
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Locks the current state for reading. A merge swaps the whole state, so
    /// a reader never observes a partially populated entity.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.state.read()
    }

    /// When the entity was last populated.
    pub fn updated_at(&self) -> SystemTime {
        *self.updated_at.lock()
    }

    fn replace(&self, state: T) {
        *self.state.write() = state;
        *self.updated_at.lock() = SystemTime::now();
    }
}

/// A shared reference to a live entity.
pub struct EntityRef<T>(Arc<EntityCell<T>>);

impl<T: Entity> EntityRef<T> {
    fn new(id: Id, state: T) -> Self {
        EntityRef(Arc::new(EntityCell {
            id,
            state: RwLock::new(state),
            updated_at: Mutex::new(SystemTime::now()),
        }))
    }

    /// Whether both references point to the same live entity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The untyped handle stored in the identity map.
    pub fn handle(&self) -> EntityHandle {
        self.0.clone()
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        EntityRef(self.0.clone())
    }
}

impl<T> Deref for EntityRef<T> {
    type Target = EntityCell<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.0.id).finish()
    }
}

impl<T: Entity> GraphType for EntityRef<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;
}

/// Entity references are resolved through the identity map in scope.
impl<'de, T: Entity> Deserialize<'de> for EntityRef<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let Some(map) = current_identity_map() else {
            return Err(D::Error::custom(record_error(EntityError::NoIdentityMap)));
        };
        let payload = match value {
            Value::Object(payload) => payload,
            other => {
                return Err(D::Error::custom(format!(
                    "invalid type: {}, expected an entity object",
                    value_kind(&other)
                )))
            }
        };
        map.merge::<T>(payload)
            .map_err(|error| D::Error::custom(record_error(error)))
    }
}

/// Type-erased view of an entity, as stored in the identity map.
pub trait EntityObject: fmt::Debug + Send + Sync {
    fn id(&self) -> &Id;

    /// The concrete type name.
    fn type_name(&self) -> &'static str;

    /// Declared ancestor type names, nearest first.
    fn ancestors(&self) -> &'static [&'static str];

    fn updated_at(&self) -> SystemTime;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> EntityObject for EntityCell<T> {
    fn id(&self) -> &Id {
        &self.id
    }

    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn ancestors(&self) -> &'static [&'static str] {
        T::ANCESTORS
    }

    fn updated_at(&self) -> SystemTime {
        EntityCell::updated_at(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An untyped entity handle.
pub type EntityHandle = Arc<dyn EntityObject>;

/// Type names an entity is registered under, most derived first.
fn type_chain(entity: &dyn EntityObject) -> impl Iterator<Item = &'static str> {
    iter::once(entity.type_name()).chain(entity.ancestors().iter().copied())
}

fn same_entity(a: &EntityHandle, b: &EntityHandle) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// A type name entities can be looked up and observed by.
///
/// Every [`Entity`] is its own kind. Ancestor types (interfaces, base
/// classes) are declared as kinds whose references are [`EntityHandle`]s or
/// any other view the generated code can build from one.
pub trait EntityKind: 'static {
    const NAME: &'static str;

    type Ref: Clone + Send + Sync + 'static;

    fn downcast(handle: &EntityHandle) -> Option<Self::Ref>;
}

impl<T: Entity> EntityKind for T {
    const NAME: &'static str = T::TYPE_NAME;

    type Ref = EntityRef<T>;

    fn downcast(handle: &EntityHandle) -> Option<Self::Ref> {
        handle
            .clone()
            .into_any()
            .downcast::<EntityCell<T>>()
            .ok()
            .map(EntityRef)
    }
}

trait ManagerSink: Send + Sync {
    fn added(&self, entity: &EntityHandle);
    fn removed(&self, entity: &EntityHandle);
    fn updated(&self, entity: &EntityHandle);
}

#[derive(Default)]
struct Registry {
    /// `type name -> id -> entity`
    buckets: HashMap<&'static str, HashMap<Id, EntityHandle>>,
    managers: HashMap<&'static str, Arc<dyn ManagerSink>>,
}

impl Registry {
    fn find<T: Entity>(&self, id: &str) -> Option<EntityRef<T>> {
        self.buckets
            .get(T::TYPE_NAME)
            .and_then(|bucket| bucket.get(id))
            .and_then(T::downcast)
    }

    fn insert(&mut self, entity: &EntityHandle) {
        for name in type_chain(entity.as_ref()) {
            self.buckets
                .entry(name)
                .or_default()
                .insert(entity.id().clone(), entity.clone());
        }
    }

    fn managers_for(&self, entity: &dyn EntityObject) -> Vec<Arc<dyn ManagerSink>> {
        type_chain(entity)
            .filter_map(|name| self.managers.get(name).cloned())
            .collect()
    }
}

enum Notification {
    Added,
    Removed,
    Updated,
}

fn notify(managers: &[Arc<dyn ManagerSink>], entity: &EntityHandle, notification: Notification) {
    for manager in managers {
        match notification {
            Notification::Added => manager.added(entity),
            Notification::Removed => manager.removed(entity),
            Notification::Updated => manager.updated(entity),
        }
    }
}

/// The registry of live entities and their managers for one client session.
///
/// Cloning is cheap and every clone refers to the same registry. Mutation is
/// serialized by a single lock; notifications are delivered after it is
/// released, most derived type first.
#[derive(Clone, Default)]
pub struct IdentityMap {
    registry: Arc<RwLock<Registry>>,
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("IdentityMap")
            .field("types", &registry.buckets.len())
            .field("managers", &registry.managers.len())
            .finish()
    }
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks an entity up by id under a type name.
    pub fn get<K: EntityKind>(&self, id: &str) -> Option<K::Ref> {
        let registry = self.registry.read();
        registry
            .buckets
            .get(K::NAME)
            .and_then(|bucket| bucket.get(id))
            .and_then(K::downcast)
    }

    /// Looks an entity up by id under a type name given at runtime.
    pub fn get_untyped(&self, type_name: &str, id: &str) -> Option<EntityHandle> {
        let registry = self.registry.read();
        registry
            .buckets
            .get(type_name)
            .and_then(|bucket| bucket.get(id))
            .cloned()
    }

    /// Registers an entity under its type and all its ancestors, replacing
    /// whatever was registered there for the same id.
    pub fn add<T: Entity>(&self, entity: &EntityRef<T>) {
        let handle = entity.handle();
        let managers = {
            let mut registry = self.registry.write();
            registry.insert(&handle);
            registry.managers_for(handle.as_ref())
        };
        tracing::debug!("added {} {}", T::TYPE_NAME, handle.id());
        notify(&managers, &handle, Notification::Added);
    }

    /// Registers an entity built in client code.
    ///
    /// If an entity with the same id is already live its state is replaced
    /// and the existing reference is returned.
    pub fn insert<T: Entity>(&self, state: T) -> EntityRef<T> {
        let id = state.id().clone();
        let (entity, managers, state) = self.find_or_register(id, state);
        let handle = entity.handle();
        match state {
            Some(state) => {
                entity.replace(state);
                notify(&managers, &handle, Notification::Updated);
            }
            None => {
                tracing::debug!("added {} {}", T::TYPE_NAME, handle.id());
                notify(&managers, &handle, Notification::Added);
            }
        }
        entity
    }

    /// Looks the entity up, registering `state` as a new entity when there is
    /// none. The state is handed back when an existing entity must take it.
    ///
    /// Only the registry lock is held here; the entity's own lock is taken
    /// afterwards so a reader holding it can still reach the registry.
    fn find_or_register<T: Entity>(
        &self,
        id: Id,
        state: T,
    ) -> (EntityRef<T>, Vec<Arc<dyn ManagerSink>>, Option<T>) {
        let mut registry = self.registry.write();
        match registry.find::<T>(id.as_str()) {
            Some(existing) => {
                let managers = registry.managers_for(existing.0.as_ref());
                (existing, managers, Some(state))
            }
            None => {
                let entity = EntityRef::new(id, state);
                registry.insert(&entity.handle());
                let managers = registry.managers_for(entity.0.as_ref());
                (entity, managers, None)
            }
        }
    }

    /// Unregisters an entity from its type and all its ancestors.
    ///
    /// Nothing is removed, and `false` is returned, unless every one of those
    /// registrations holds this very entity.
    pub fn remove<T: Entity>(&self, entity: &EntityRef<T>) -> bool {
        self.remove_handle(&entity.handle())
    }

    /// Untyped variant of [`IdentityMap::remove`].
    pub fn remove_handle(&self, entity: &EntityHandle) -> bool {
        let managers = {
            let mut registry = self.registry.write();
            let consistent = type_chain(entity.as_ref()).all(|name| {
                registry
                    .buckets
                    .get(name)
                    .and_then(|bucket| bucket.get(entity.id()))
                    .map(|registered| same_entity(registered, entity))
                    .unwrap_or(false)
            });
            if !consistent {
                tracing::warn!(
                    "not removing {} {}: it is not registered under every type it belongs to",
                    entity.type_name(),
                    entity.id()
                );
                return false;
            }
            for name in type_chain(entity.as_ref()) {
                if let Some(bucket) = registry.buckets.get_mut(name) {
                    bucket.remove(entity.id());
                }
            }
            registry.managers_for(entity.as_ref())
        };
        tracing::debug!("removed {} {}", entity.type_name(), entity.id());
        notify(&managers, entity, Notification::Removed);
        true
    }

    /// Merges an entity payload read from a response.
    ///
    /// The payload replaces the whole state of the live entity with the same
    /// id, so fields it does not carry are cleared. A new entity is registered
    /// first. Either way one update is delivered per merge.
    ///
    /// Entities nested in the payload are merged as they are read, before the
    /// outer entity is complete. They stay registered, and their events stay
    /// delivered, even if the rest of the payload then fails to deserialize.
    pub fn merge<T: Entity>(&self, payload: Object) -> Result<EntityRef<T>, EntityError> {
        let id = entity_id(&payload)?;
        let (state, nested_error) = with_identity_map(self, || {
            serde_json_bytes::from_value::<T>(Value::Object(payload))
        });
        if let Some(error) = nested_error {
            return Err(error);
        }
        let state = state.map_err(|error| EntityError::Deserialization {
            type_name: T::TYPE_NAME.to_string(),
            reason: error.to_string(),
        })?;

        let (entity, managers, state) = self.find_or_register(id, state);
        let added = state.is_none();
        if let Some(state) = state {
            entity.replace(state);
        }

        let handle = entity.handle();
        tracing::debug!(
            "merged {} {} ({})",
            T::TYPE_NAME,
            handle.id(),
            if added { "new" } else { "existing" }
        );
        if added {
            notify(&managers, &handle, Notification::Added);
        }
        notify(&managers, &handle, Notification::Updated);
        Ok(entity)
    }

    /// Attaches a manager to its type name, then delivers "added" for every
    /// entity already registered under it.
    pub fn register_manager<K: EntityKind>(
        &self,
        manager: &EntityManager<K>,
    ) -> Result<(), EntityError> {
        let existing = {
            let mut registry = self.registry.write();
            if registry.managers.contains_key(K::NAME) {
                return Err(EntityError::DuplicateManagerRegistration {
                    type_name: K::NAME.to_string(),
                });
            }
            registry
                .managers
                .insert(K::NAME, manager.inner.clone() as Arc<dyn ManagerSink>);
            registry
                .buckets
                .get(K::NAME)
                .map(|bucket| bucket.values().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        tracing::debug!(
            "registered manager for {} with {} existing entities",
            K::NAME,
            existing.len()
        );
        for entity in &existing {
            manager.inner.added(entity);
        }
        Ok(())
    }

    /// Detaches a manager, then delivers "removed" for every entity still
    /// registered under its type name. Returns `false` if this manager was not
    /// the registered one.
    pub fn unregister_manager<K: EntityKind>(&self, manager: &EntityManager<K>) -> bool {
        let existing = {
            let mut registry = self.registry.write();
            let registered = registry
                .managers
                .get(K::NAME)
                .map(|registered| {
                    Arc::as_ptr(registered).cast::<()>() == Arc::as_ptr(&manager.inner).cast::<()>()
                })
                .unwrap_or(false);
            if !registered {
                return false;
            }
            registry.managers.remove(K::NAME);
            registry
                .buckets
                .get(K::NAME)
                .map(|bucket| bucket.values().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        tracing::debug!("unregistered manager for {}", K::NAME);
        for entity in &existing {
            manager.inner.removed(entity);
        }
        true
    }
}

/// Reads the `id` of an entity payload, matching the key case-insensitively.
fn entity_id(payload: &Object) -> Result<Id, EntityError> {
    match payload.get_ignore_case("id") {
        None | Some(Value::Null) => Err(EntityError::MissingEntityId),
        Some(Value::String(id)) => Ok(Id::new(id.as_str())),
        Some(other) => Err(EntityError::InvalidEntityIdType {
            found: value_kind(other).to_string(),
        }),
    }
}

/// Identifies a subscription made on an [`EntityManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<R> = Arc<dyn Fn(&R) + Send + Sync>;

struct Subscribers<R> {
    added: Vec<(SubscriptionId, Callback<R>)>,
    removed: Vec<(SubscriptionId, Callback<R>)>,
    updated: Vec<(SubscriptionId, Callback<R>)>,
}

impl<R> Default for Subscribers<R> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            updated: Vec::new(),
        }
    }
}

struct ManagerInner<K: EntityKind> {
    view: RwLock<HashMap<Id, K::Ref>>,
    subscribers: Mutex<Subscribers<K::Ref>>,
    next_subscription: AtomicU64,
}

impl<K: EntityKind> ManagerInner<K> {
    /// Calls the subscribers of one event on a snapshot of the list, so
    /// callbacks may subscribe or unsubscribe while being notified.
    fn fire(&self, notification: Notification, entity: &K::Ref) {
        let callbacks = {
            let subscribers = self.subscribers.lock();
            let list = match notification {
                Notification::Added => &subscribers.added,
                Notification::Removed => &subscribers.removed,
                Notification::Updated => &subscribers.updated,
            };
            list.iter()
                .map(|(_, callback)| callback.clone())
                .collect::<Vec<_>>()
        };
        for callback in callbacks {
            callback(entity);
        }
    }
}

impl<K: EntityKind> ManagerSink for ManagerInner<K> {
    fn added(&self, entity: &EntityHandle) {
        if let Some(typed) = K::downcast(entity) {
            self.view.write().insert(entity.id().clone(), typed.clone());
            self.fire(Notification::Added, &typed);
        }
    }

    fn removed(&self, entity: &EntityHandle) {
        let removed = self.view.write().remove(entity.id());
        if let Some(typed) = removed.or_else(|| K::downcast(entity)) {
            self.fire(Notification::Removed, &typed);
        }
    }

    fn updated(&self, entity: &EntityHandle) {
        if let Some(typed) = K::downcast(entity) {
            self.fire(Notification::Updated, &typed);
        }
    }
}

/// A typed observer of one entity type name.
///
/// Keeps its own `id -> entity` view, filled as entities are added and
/// emptied as they are removed.
pub struct EntityManager<K: EntityKind> {
    inner: Arc<ManagerInner<K>>,
}

impl<K: EntityKind> Clone for EntityManager<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: EntityKind> Default for EntityManager<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                view: RwLock::new(HashMap::new()),
                subscribers: Mutex::new(Subscribers::default()),
                next_subscription: AtomicU64::new(0),
            }),
        }
    }
}

impl<K: EntityKind> fmt::Debug for EntityManager<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("type_name", &K::NAME)
            .field("entities", &self.inner.view.read().len())
            .finish()
    }
}

impl<K: EntityKind> EntityManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<K::Ref> {
        self.inner.view.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.view.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.view.read().is_empty()
    }

    pub fn ids(&self) -> Vec<Id> {
        self.inner.view.read().keys().cloned().collect()
    }

    pub fn on_added(&self, callback: impl Fn(&K::Ref) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(Notification::Added, Arc::new(callback))
    }

    pub fn on_removed(&self, callback: impl Fn(&K::Ref) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(Notification::Removed, Arc::new(callback))
    }

    pub fn on_updated(&self, callback: impl Fn(&K::Ref) + Send + Sync + 'static) -> SubscriptionId {
        self.subscribe(Notification::Updated, Arc::new(callback))
    }

    /// Drops a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let before =
            subscribers.added.len() + subscribers.removed.len() + subscribers.updated.len();
        subscribers.added.retain(|(id, _)| *id != subscription);
        subscribers.removed.retain(|(id, _)| *id != subscription);
        subscribers.updated.retain(|(id, _)| *id != subscription);
        before != subscribers.added.len() + subscribers.removed.len() + subscribers.updated.len()
    }

    fn subscribe(&self, notification: Notification, callback: Callback<K::Ref>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.inner.subscribers.lock();
        match notification {
            Notification::Added => subscribers.added.push((id, callback)),
            Notification::Removed => subscribers.removed.push((id, callback)),
            Notification::Updated => subscribers.updated.push((id, callback)),
        }
        id
    }
}

struct Scope {
    map: IdentityMap,
    error: Option<EntityError>,
}

thread_local! {
    static SCOPES: RefCell<Vec<Scope>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

/// Runs `f` with `map` as the identity map that [`EntityRef`]s deserialize
/// into, returning the first entity error raised while it ran.
pub(crate) fn with_identity_map<R>(
    map: &IdentityMap,
    f: impl FnOnce() -> R,
) -> (R, Option<EntityError>) {
    SCOPES.with(|scopes| {
        scopes.borrow_mut().push(Scope {
            map: map.clone(),
            error: None,
        })
    });
    let guard = ScopeGuard;
    let result = f();
    let error = SCOPES.with(|scopes| {
        scopes
            .borrow_mut()
            .last_mut()
            .and_then(|scope| scope.error.take())
    });
    drop(guard);
    (result, error)
}

fn current_identity_map() -> Option<IdentityMap> {
    SCOPES.with(|scopes| scopes.borrow().last().map(|scope| scope.map.clone()))
}

/// Keeps the first entity error of the current scope so it can be reported
/// with its own type rather than as a generic deserialization failure.
fn record_error(error: EntityError) -> EntityError {
    SCOPES.with(|scopes| {
        if let Some(scope) = scopes.borrow_mut().last_mut() {
            scope.error.get_or_insert_with(|| error.clone());
        }
    });
    error
}
