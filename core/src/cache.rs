//! Memoized alias resolution with at most one in-flight request per alias.
//!
//! The cache keeps three tables behind one mutex:
//! - `resolved`: the current value of every alias resolved since it was last invalidated
//! - `pending`: the single in-flight resolution ("flight") per alias, shared by all callers
//! - `bindings`: for state-bound aliases, which entity the cached value was resolved against
//!
//! Device lookups by raw device id are memoized alongside, with the same single-flight rule.
//!
//! The mutex is only ever held briefly and never across an await. Checking the cache, joining a
//! flight and registering a new flight happen inside one critical section.
//!
//! Every flight carries a sequence number. A flight only writes its result back if it is still
//! the registered flight for its alias when it settles; [`ResolutionCache::reset`] detaches the
//! registered flight so that a superseded resolution can never overwrite a newer one.
//!
//! Definitions and state parameters are read outside the lock, so resets and state transitions
//! also advance an epoch. A flight is only registered if the epoch it read under is still current.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use tracing::warn;

use crate::{
    action_debug,
    equivalence::{same_entity, same_entity_info},
    error::ResolutionError,
    model::{AliasDefinition, AliasFilter, AliasId, EntityFilter, EntityId, EntityInfo, ResolvedAlias, StateBinding, StateParams},
    resolver::{EntityResolver, LookupOptions},
};

/// Where the cache reads alias definitions and the state parameters to resolve them against
pub trait AliasSource: Send + Sync {
    fn alias(&self, id: &AliasId) -> Option<AliasDefinition>;
    fn state_params(&self) -> StateParams;
}

type Resolution = Shared<BoxFuture<'static, Result<ResolvedAlias, ResolutionError>>>;

struct Flight {
    seq: u64,
    filter: AliasFilter,
    params: StateParams,
    handle: Resolution,
}

type DeviceLookup = Shared<BoxFuture<'static, Option<EntityInfo>>>;

enum Device {
    Found(Option<EntityInfo>),
    InFlight { seq: u64, handle: DeviceLookup },
}

struct Bound {
    binding: StateBinding,
    filter: AliasFilter,
}

#[derive(Default)]
struct CacheState {
    resolved: HashMap<AliasId, ResolvedAlias>,
    pending: HashMap<AliasId, Flight>,
    bindings: HashMap<AliasId, Bound>,
    devices: HashMap<String, Device>,
    next_seq: u64,
    epoch: u64,
}

enum Entry {
    Ready(ResolvedAlias),
    InFlight(Resolution),
}

impl CacheState {
    fn entry(&self, id: &AliasId) -> Option<Entry> {
        if let Some(alias) = self.resolved.get(id) {
            return Some(Entry::Ready(alias.clone()));
        }
        self.pending.get(id).map(|flight| Entry::InFlight(flight.handle.clone()))
    }

    fn invalidate(&mut self, id: &AliasId) -> bool {
        self.bindings.remove(id);
        self.resolved.remove(id).is_some()
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

#[derive(Clone)]
pub struct ResolutionCache(Arc<Inner>);

struct Inner {
    resolver: Arc<dyn EntityResolver>,
    source: Arc<dyn AliasSource>,
    state: Mutex<CacheState>,
}

impl std::fmt::Display for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ResolutionCache") }
}

impl ResolutionCache {
    pub fn new(resolver: Arc<dyn EntityResolver>, source: Arc<dyn AliasSource>) -> Self {
        Self(Arc::new(Inner { resolver, source, state: Mutex::new(CacheState::default()) }))
    }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> { &self.0.resolver }

    fn state(&self) -> std::sync::MutexGuard<'_, CacheState> { self.0.state.lock().expect("Failed to lock the resolution cache") }

    /// Get the resolved alias, joining the in-flight resolution or starting one as needed
    pub async fn get(&self, alias_id: &AliasId) -> Result<ResolvedAlias, ResolutionError> {
        let entry = loop {
            let (entry, epoch) = {
                let state = self.state();
                (state.entry(alias_id), state.epoch)
            };
            if let Some(entry) = entry {
                break entry;
            }
            let definition = self.0.source.alias(alias_id).ok_or_else(|| ResolutionError::AliasNotFound(alias_id.clone()))?;
            let params = self.0.source.state_params();
            match self.start(definition, params, epoch) {
                Some(entry) => break entry,
                None => action_debug!(self, "retry", "{} was reset while its definition was read", alias_id),
            }
        };

        match entry {
            Entry::Ready(alias) => Ok(alias),
            Entry::InFlight(handle) => handle.await,
        }
    }

    /// Register a flight, unless one was registered since we last looked (join it) or the
    /// definition and params were read before a reset (`None`).
    fn start(&self, definition: AliasDefinition, params: StateParams, epoch: u64) -> Option<Entry> {
        let mut state = self.state();
        if let Some(entry) = state.entry(&definition.id) {
            action_debug!(self, "join", "{}", definition.id);
            return Some(entry);
        }
        if state.epoch != epoch {
            return None;
        }

        let seq = state.next_seq();
        action_debug!(self, "start", "{} #{}", definition.id, seq);

        let id = definition.id.clone();
        let filter = definition.filter.clone();
        let handle = resolve(Arc::downgrade(&self.0), self.0.resolver.clone(), seq, definition, params.clone());
        state.pending.insert(id, Flight { seq, filter, params, handle: handle.clone() });
        Some(Entry::InFlight(handle))
    }

    /// The cached value, without ever starting a resolution
    pub fn peek(&self, alias_id: &AliasId) -> Option<ResolvedAlias> { self.state().resolved.get(alias_id).cloned() }

    /// Forget the cached value and its state binding. An in-flight resolution is left alone and
    /// still populates the cache when it lands.
    pub fn invalidate(&self, alias_id: &AliasId) -> bool {
        let removed = self.state().invalidate(alias_id);
        action_debug!(self, "invalidate", "{} (cached: {})", alias_id, removed);
        removed
    }

    /// Invalidate every cached alias and forget every device lookup
    pub fn invalidate_all(&self) -> Vec<AliasId> {
        let mut state = self.state();
        let mut ids: Vec<AliasId> = state.resolved.keys().cloned().collect();
        ids.sort();
        for id in &ids {
            state.invalidate(id);
        }
        state.devices.clear();
        action_debug!(self, "invalidate_all", "{} aliases", ids.len());
        ids
    }

    /// Invalidate and detach the in-flight resolution, if any. Callers already joined on the
    /// detached flight still receive its result but the cache discards it. The next `get`
    /// starts a fresh resolution.
    pub fn reset(&self, alias_id: &AliasId) {
        let mut state = self.state();
        state.epoch += 1;
        state.invalidate(alias_id);
        if let Some(flight) = state.pending.remove(alias_id) {
            action_debug!(self, "detach", "{} #{}", alias_id, flight.seq);
        }
    }

    /// Reset every given alias, then resolve them all concurrently. Returns once every
    /// resolution has settled, successfully or not, in the order the ids were given.
    pub async fn refresh(&self, alias_ids: &[AliasId]) -> Vec<(AliasId, Result<ResolvedAlias, ResolutionError>)> {
        for id in alias_ids {
            self.reset(id);
        }
        let results = join_all(alias_ids.iter().map(|id| self.get(id))).await;
        alias_ids.iter().cloned().zip(results).collect()
    }

    /// Detect state-bound aliases whose bound entity differs under `params`, and reset them.
    ///
    /// Covers both cached aliases (via their state binding) and in-flight resolutions that were
    /// started under parameters binding a different entity. Nothing is re-resolved here; the
    /// returned ids are re-resolved on their next `get`.
    pub fn on_state_transition(&self, params: &StateParams) -> Vec<AliasId> {
        let resolver = &self.0.resolver;
        let mut state = self.state();
        // a get that read the previous params must not register against them
        state.epoch += 1;
        let mut changed = BTreeSet::new();

        for (id, bound) in state.bindings.iter() {
            let current = resolver.state_entity_id(&bound.filter, params);
            if !same_entity(bound.binding.last_known_entity_id.as_ref(), current.as_ref()) {
                changed.insert(id.clone());
            }
        }
        for (id, flight) in state.pending.iter() {
            if flight.filter.is_state_bound() {
                let started = resolver.state_entity_id(&flight.filter, &flight.params);
                let current = resolver.state_entity_id(&flight.filter, params);
                if !same_entity(started.as_ref(), current.as_ref()) {
                    changed.insert(id.clone());
                }
            }
        }

        for id in &changed {
            state.invalidate(id);
            state.pending.remove(id);
        }
        drop(state);

        if !changed.is_empty() {
            action_debug!(self, "state transition", "reset {:?}", changed);
        }
        changed.into_iter().collect()
    }

    /// Overwrite the current entity of a resolved single-entity alias.
    /// Returns whether anything changed.
    pub fn set_current_entity(&self, alias_id: &AliasId, entity: EntityInfo) -> bool {
        let mut state = self.state();
        let Some(alias) = state.resolved.get_mut(alias_id) else {
            return false;
        };
        if alias.resolve_multiple || same_entity_info(alias.current_entity.as_ref(), Some(&entity)) {
            return false;
        }
        alias.entity_filter = Some(EntityFilter::single(entity.id.clone()));
        alias.current_entity = Some(entity);
        true
    }

    /// Ids of every currently cached alias, sorted
    pub fn resolved_ids(&self) -> Vec<AliasId> {
        let mut ids: Vec<AliasId> = self.state().resolved.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up a device by its raw id. Lookups are shared and memoized per device id, including
    /// lookups that found nothing. A failed lookup reports `None` and is not memoized.
    pub async fn get_device(&self, device_id: &str) -> Option<EntityInfo> {
        let handle = {
            let mut state = self.state();
            let joined = match state.devices.get(device_id) {
                Some(Device::Found(entity)) => return entity.clone(),
                Some(Device::InFlight { handle, .. }) => Some(handle.clone()),
                None => None,
            };
            match joined {
                Some(handle) => handle,
                None => {
                    let seq = state.next_seq();
                    let handle = lookup_device(Arc::downgrade(&self.0), self.0.resolver.clone(), seq, device_id.to_owned());
                    state.devices.insert(device_id.to_owned(), Device::InFlight { seq, handle: handle.clone() });
                    handle
                }
            }
        };
        handle.await
    }

    /// Forget a device lookup. Returns whether one was memoized or in flight.
    pub fn invalidate_device(&self, device_id: &str) -> bool { self.state().devices.remove(device_id).is_some() }

    pub fn is_pending(&self, alias_id: &AliasId) -> bool { self.state().pending.contains_key(alias_id) }

    pub fn binding(&self, alias_id: &AliasId) -> Option<StateBinding> { self.state().bindings.get(alias_id).map(|b| b.binding.clone()) }
}

fn resolve(cache: Weak<Inner>, resolver: Arc<dyn EntityResolver>, seq: u64, definition: AliasDefinition, params: StateParams) -> Resolution {
    async move {
        let result = resolver.resolve_alias(&definition, &params).await.map_err(|e| ResolutionError::resolver(&definition.id, e));
        if let Some(inner) = cache.upgrade() {
            inner.settle(seq, &definition, &params, &result);
        }
        result
    }
    .boxed()
    .shared()
}

fn lookup_device(cache: Weak<Inner>, resolver: Arc<dyn EntityResolver>, seq: u64, device_id: String) -> DeviceLookup {
    async move {
        let filter = EntityFilter::single(EntityId::device(device_id.as_str()));
        let found = match resolver.resolve_entity_by_filter(&filter, LookupOptions::quiet()).await {
            Ok(entity) => Some(entity),
            Err(e) => {
                warn!("ResolutionCache: lookup of device {} failed: {}", device_id, e);
                None
            }
        };
        if let Some(inner) = cache.upgrade() {
            inner.settle_device(seq, &device_id, found.clone());
        }
        found.flatten()
    }
    .boxed()
    .shared()
}

impl Inner {
    fn settle_device(&self, seq: u64, device_id: &str, found: Option<Option<EntityInfo>>) {
        let mut state = self.state.lock().expect("Failed to lock the resolution cache");
        if !matches!(state.devices.get(device_id), Some(Device::InFlight { seq: current, .. }) if *current == seq) {
            return;
        }
        match found {
            Some(entity) => state.devices.insert(device_id.to_owned(), Device::Found(entity)),
            None => state.devices.remove(device_id),
        };
    }

    fn settle(&self, seq: u64, definition: &AliasDefinition, params: &StateParams, result: &Result<ResolvedAlias, ResolutionError>) {
        let id = &definition.id;
        let mut state = self.state.lock().expect("Failed to lock the resolution cache");

        if !state.pending.get(id).is_some_and(|flight| flight.seq == seq) {
            action_debug!("ResolutionCache", "discard", "{} #{} was superseded", id, seq);
            return;
        }
        state.pending.remove(id);

        match result {
            Ok(alias) => {
                if alias.is_state_entity {
                    let binding = StateBinding {
                        alias_id: id.clone(),
                        state_param_name: alias.state_param_name.clone(),
                        last_known_entity_id: self.resolver.state_entity_id(&definition.filter, params),
                    };
                    state.bindings.insert(id.clone(), Bound { binding, filter: definition.filter.clone() });
                } else {
                    state.bindings.remove(id);
                }
                state.resolved.insert(id.clone(), alias.clone());
                action_debug!("ResolutionCache", "settle", "{} #{}", id, seq);
            }
            Err(e) => warn!("ResolutionCache: resolution #{} of {} failed: {}", seq, id, e),
        }
    }
}
