//! An [`EntityResolver`] over an in-memory entity and relation store.
//!
//! Useful for tests and for embedding dashboards whose entities are known up front.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use dashlink_core::{
    error::ResolutionError,
    model::{AliasDefinition, AliasFilterKind, EntityFilter, EntityId, EntityInfo, EntityType, RelationDirection, ResolvedAlias, StateParams},
    resolver::{EntityResolver, LookupOptions},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub from: EntityId,
    pub to: EntityId,
    pub relation_type: String,
}

#[derive(Default)]
struct Store {
    entities: BTreeMap<EntityId, EntityInfo>,
    relations: Vec<Relation>,
}

#[derive(Default)]
pub struct MemoryResolver {
    store: RwLock<Store>,
}

fn name_matches(entity: &EntityInfo, prefix: &str) -> bool { entity.name.to_lowercase().starts_with(&prefix.to_lowercase()) }

fn by_name(mut entities: Vec<EntityInfo>) -> Vec<EntityInfo> {
    entities.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    entities
}

impl MemoryResolver {
    pub fn new() -> Self { Self::default() }

    pub fn with_entities(self, entities: impl IntoIterator<Item = EntityInfo>) -> Self {
        for entity in entities {
            self.insert_entity(entity);
        }
        self
    }

    fn store(&self) -> std::sync::RwLockReadGuard<'_, Store> { self.store.read().expect("Failed to lock the entity store") }

    fn store_mut(&self) -> std::sync::RwLockWriteGuard<'_, Store> { self.store.write().expect("Failed to lock the entity store") }

    /// Insert or replace an entity
    pub fn insert_entity(&self, entity: EntityInfo) { self.store_mut().entities.insert(entity.id.clone(), entity); }

    /// Remove an entity along with every relation touching it
    pub fn remove_entity(&self, id: &EntityId) -> Option<EntityInfo> {
        let mut store = self.store_mut();
        store.relations.retain(|r| &r.from != id && &r.to != id);
        store.entities.remove(id)
    }

    pub fn add_relation(&self, from: EntityId, to: EntityId, relation_type: impl Into<String>) {
        self.store_mut().relations.push(Relation { from, to, relation_type: relation_type.into() });
    }

    pub fn entity(&self, id: &EntityId) -> Option<EntityInfo> { self.store().entities.get(id).cloned() }

    /// Every entity matching `filter`, in the order a datasource would list them
    pub fn find(&self, filter: &EntityFilter) -> Vec<EntityInfo> {
        let store = self.store();
        match filter {
            EntityFilter::SingleEntity { single_entity } => store.entities.get(single_entity).cloned().into_iter().collect(),
            EntityFilter::EntityList { entity_type, entity_list } => {
                entity_list.iter().filter_map(|id| store.entities.get(&EntityId::new(*entity_type, id.as_str())).cloned()).collect()
            }
            EntityFilter::EntityName { entity_type, entity_name_filter } => by_name(
                store.entities.values().filter(|e| e.id.entity_type == *entity_type && name_matches(e, entity_name_filter)).cloned().collect(),
            ),
            EntityFilter::DeviceType { device_type, device_name_filter } => by_name(store.typed(EntityType::Device, device_type, device_name_filter)),
            EntityFilter::AssetType { asset_type, asset_name_filter } => by_name(store.typed(EntityType::Asset, asset_type, asset_name_filter)),
            EntityFilter::RelationsQuery { root_entity, direction, max_level, relation_type, entity_types } => store
                .related(root_entity, *direction, *max_level, relation_type.as_deref())
                .into_iter()
                .filter(|id| entity_types.is_empty() || entity_types.contains(&id.entity_type))
                .filter_map(|id| store.entities.get(&id).cloned())
                .collect(),
        }
    }
}

impl Store {
    fn typed(&self, entity_type: EntityType, subtype: &str, name_filter: &str) -> Vec<EntityInfo> {
        self.entities
            .values()
            .filter(|e| e.id.entity_type == entity_type && e.subtype.as_deref() == Some(subtype) && name_matches(e, name_filter))
            .cloned()
            .collect()
    }

    /// Breadth-first walk of the relation graph. A `max_level` of zero or less is unbounded.
    fn related(&self, root: &EntityId, direction: RelationDirection, max_level: i32, relation_type: Option<&str>) -> Vec<EntityId> {
        let mut seen: HashSet<&EntityId> = HashSet::from([root]);
        let mut found = Vec::new();
        let mut queue = VecDeque::from([(root, 0)]);

        while let Some((current, level)) = queue.pop_front() {
            if max_level > 0 && level >= max_level {
                continue;
            }
            for relation in &self.relations {
                if relation_type.is_some_and(|t| t != relation.relation_type) {
                    continue;
                }
                let next = match direction {
                    RelationDirection::From if &relation.from == current => &relation.to,
                    RelationDirection::To if &relation.to == current => &relation.from,
                    _ => continue,
                };
                if seen.insert(next) {
                    found.push(next.clone());
                    queue.push_back((next, level + 1));
                }
            }
        }
        found
    }
}

#[async_trait]
impl EntityResolver for MemoryResolver {
    async fn resolve_alias(&self, alias: &AliasDefinition, params: &StateParams) -> anyhow::Result<ResolvedAlias> {
        let filter = &alias.filter;
        let state_entity = filter.state_entity_id(params);

        let entity_filter = match &filter.kind {
            AliasFilterKind::SingleEntity { single_entity } => {
                if self.entity(single_entity).is_none() {
                    return Err(ResolutionError::EntityNotFound(single_entity.clone()).into());
                }
                Some(EntityFilter::single(single_entity.clone()))
            }
            AliasFilterKind::EntityList { entity_type, entity_list } => {
                Some(EntityFilter::EntityList { entity_type: *entity_type, entity_list: entity_list.clone() })
            }
            AliasFilterKind::EntityName { entity_type, entity_name_filter } => {
                Some(EntityFilter::EntityName { entity_type: *entity_type, entity_name_filter: entity_name_filter.clone() })
            }
            AliasFilterKind::StateEntity { .. } => state_entity.clone().map(EntityFilter::single),
            AliasFilterKind::DeviceType { device_type, device_name_filter } => {
                Some(EntityFilter::DeviceType { device_type: device_type.clone(), device_name_filter: device_name_filter.clone() })
            }
            AliasFilterKind::AssetType { asset_type, asset_name_filter } => {
                Some(EntityFilter::AssetType { asset_type: asset_type.clone(), asset_name_filter: asset_name_filter.clone() })
            }
            AliasFilterKind::RelationsQuery(query) => {
                let root = match query.root_state_entity {
                    true => state_entity.clone(),
                    false => query.root_entity.clone(),
                };
                root.map(|root_entity| EntityFilter::RelationsQuery {
                    root_entity,
                    direction: query.direction,
                    max_level: query.max_level,
                    relation_type: query.relation_type.clone(),
                    entity_types: query.entity_types.clone(),
                })
            }
        };

        let current_entity = entity_filter.as_ref().and_then(|f| self.find(f).into_iter().next());
        // a single-entity alias narrows to the first match, a state entity which no longer exists is unresolved
        let entity_filter = match (&current_entity, filter.resolve_multiple) {
            (Some(entity), false) => Some(EntityFilter::single(entity.id.clone())),
            (None, _) if matches!(filter.kind, AliasFilterKind::StateEntity { .. }) => None,
            _ => entity_filter,
        };
        debug!("MemoryResolver.resolve_alias: {} -> {:?}", alias.id, current_entity.as_ref().map(|e| &e.id));

        Ok(ResolvedAlias {
            alias_id: alias.id.clone(),
            alias: alias.alias.clone(),
            resolve_multiple: filter.resolve_multiple,
            entity_filter,
            current_entity,
            is_state_entity: filter.is_state_bound(),
            state_param_name: filter.state_param_name().map(str::to_owned),
        })
    }

    async fn resolve_entity_by_filter(&self, filter: &EntityFilter, _opts: LookupOptions) -> anyhow::Result<Option<EntityInfo>> {
        Ok(self.find(filter).into_iter().next())
    }
}
