//! Alias definitions and their resolved forms.
//!
//! Definitions are closed, explicitly modeled structures (tagged unions for the filter kinds) so
//! that "did this definition change" is plain structural equality. See [`crate::equivalence`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self { Self(id.to_owned()) }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self { Self(id) }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str { &self.0 }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
        }
    };
}

string_id!(
    /// Identifies an entity alias within a dashboard
    AliasId
);
string_id!(
    /// Identifies a reusable filter within a dashboard
    FilterId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Device,
    Asset,
    EntityView,
    Customer,
    Tenant,
    User,
    Dashboard,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityType::Device => "DEVICE",
            EntityType::Asset => "ASSET",
            EntityType::EntityView => "ENTITY_VIEW",
            EntityType::Customer => "CUSTOMER",
            EntityType::Tenant => "TENANT",
            EntityType::User => "USER",
            EntityType::Dashboard => "DASHBOARD",
        };
        f.write_str(name)
    }
}

/// A typed reference to a concrete entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityId {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityId {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self { Self { entity_type, id: id.into() } }
    pub fn device(id: impl Into<String>) -> Self { Self::new(EntityType::Device, id) }
    pub fn asset(id: impl Into<String>) -> Self { Self::new(EntityType::Asset, id) }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}/{}", self.entity_type, self.id) }
}

/// Display information about a concrete entity, as returned by an entity lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInfo {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Device type or asset type, where the entity kind has one
    #[serde(default)]
    pub subtype: Option<String>,
}

impl EntityInfo {
    pub fn new(id: EntityId, name: impl Into<String>) -> Self { Self { id, name: name.into(), label: None, subtype: None } }
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }
}

/// The dashboard's navigation state parameters.
///
/// `entity_id` is the state's root entity, used by state-bound filters that do not name a
/// parameter. Named parameters are looked up in `params`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateParams {
    pub entity_id: Option<EntityId>,
    pub params: BTreeMap<String, EntityId>,
}

impl StateParams {
    pub fn new() -> Self { Self::default() }

    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity_id = Some(entity);
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, entity: EntityId) -> Self {
        self.params.insert(name.into(), entity);
        self
    }

    /// The entity bound to `param_name`, or to the root of the state when no (or an empty) name is given
    pub fn entity_id(&self, param_name: Option<&str>) -> Option<&EntityId> {
        match param_name {
            Some(name) if !name.is_empty() => self.params.get(name),
            _ => self.entity_id.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationDirection {
    #[default]
    From,
    To,
}

fn default_max_level() -> i32 { 1 }

/// Relation traversal starting from either a fixed root entity or the current state entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationsQuery {
    #[serde(default)]
    pub root_state_entity: bool,
    #[serde(default)]
    pub state_entity_param_name: Option<String>,
    #[serde(default)]
    pub default_state_entity: Option<EntityId>,
    #[serde(default)]
    pub root_entity: Option<EntityId>,
    #[serde(default)]
    pub direction: RelationDirection,
    /// Values of zero or less mean unbounded depth
    #[serde(default = "default_max_level")]
    pub max_level: i32,
    #[serde(default)]
    pub relation_type: Option<String>,
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AliasFilterKind {
    SingleEntity {
        single_entity: EntityId,
    },
    EntityList {
        entity_type: EntityType,
        entity_list: Vec<String>,
    },
    EntityName {
        entity_type: EntityType,
        entity_name_filter: String,
    },
    StateEntity {
        #[serde(default)]
        state_entity_param_name: Option<String>,
        #[serde(default)]
        default_state_entity: Option<EntityId>,
    },
    DeviceType {
        device_type: String,
        #[serde(default)]
        device_name_filter: String,
    },
    AssetType {
        asset_type: String,
        #[serde(default)]
        asset_name_filter: String,
    },
    RelationsQuery(RelationsQuery),
}

/// How an alias finds its entity (or entities)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasFilter {
    #[serde(default)]
    pub resolve_multiple: bool,
    #[serde(flatten)]
    pub kind: AliasFilterKind,
}

impl AliasFilter {
    pub fn single(kind: AliasFilterKind) -> Self { Self { resolve_multiple: false, kind } }
    pub fn multiple(kind: AliasFilterKind) -> Self { Self { resolve_multiple: true, kind } }

    /// A single-entity filter following the named state parameter (or the state root when `None`)
    pub fn state_entity(param_name: Option<&str>) -> Self {
        Self::single(AliasFilterKind::StateEntity { state_entity_param_name: param_name.map(str::to_owned), default_state_entity: None })
    }

    /// Whether the resolved target of this filter depends on the dashboard state
    pub fn is_state_bound(&self) -> bool {
        match &self.kind {
            AliasFilterKind::StateEntity { .. } => true,
            AliasFilterKind::RelationsQuery(query) => query.root_state_entity,
            _ => false,
        }
    }

    pub fn state_param_name(&self) -> Option<&str> {
        match &self.kind {
            AliasFilterKind::StateEntity { state_entity_param_name, .. } => state_entity_param_name.as_deref(),
            AliasFilterKind::RelationsQuery(query) if query.root_state_entity => query.state_entity_param_name.as_deref(),
            _ => None,
        }
    }

    /// The entity this filter is bound to under `params`, falling back to its default state entity.
    /// Always `None` for filters which are not state bound.
    pub fn state_entity_id(&self, params: &StateParams) -> Option<EntityId> {
        let default = match &self.kind {
            AliasFilterKind::StateEntity { default_state_entity, .. } => default_state_entity.as_ref(),
            AliasFilterKind::RelationsQuery(query) if query.root_state_entity => query.default_state_entity.as_ref(),
            _ => return None,
        };
        params.entity_id(self.state_param_name()).or(default).cloned()
    }
}

/// Author-time description of an alias
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasDefinition {
    pub id: AliasId,
    /// Display name of the alias
    pub alias: String,
    pub filter: AliasFilter,
}

impl AliasDefinition {
    pub fn new(id: impl Into<AliasId>, alias: impl Into<String>, filter: AliasFilter) -> Self {
        Self { id: id.into(), alias: alias.into(), filter }
    }
}

/// A concrete query handed to datasources once an alias is resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EntityFilter {
    SingleEntity {
        single_entity: EntityId,
    },
    EntityList {
        entity_type: EntityType,
        entity_list: Vec<String>,
    },
    EntityName {
        entity_type: EntityType,
        entity_name_filter: String,
    },
    DeviceType {
        device_type: String,
        device_name_filter: String,
    },
    AssetType {
        asset_type: String,
        asset_name_filter: String,
    },
    RelationsQuery {
        root_entity: EntityId,
        direction: RelationDirection,
        max_level: i32,
        relation_type: Option<String>,
        entity_types: Vec<EntityType>,
    },
}

impl EntityFilter {
    pub fn single(entity: EntityId) -> Self { EntityFilter::SingleEntity { single_entity: entity } }
}

/// The outcome of resolving an [`AliasDefinition`] against the current state parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAlias {
    pub alias_id: AliasId,
    pub alias: String,
    pub resolve_multiple: bool,
    /// `None` when nothing could be bound yet, eg. a state entity whose parameter is unset
    pub entity_filter: Option<EntityFilter>,
    pub current_entity: Option<EntityInfo>,
    pub is_state_entity: bool,
    pub state_param_name: Option<String>,
}

impl ResolvedAlias {
    pub fn is_unresolved(&self) -> bool { self.entity_filter.is_none() }
}

/// Tracks which entity a state-bound alias was last resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateBinding {
    pub alias_id: AliasId,
    pub state_param_name: Option<String>,
    pub last_known_entity_id: Option<EntityId>,
}
