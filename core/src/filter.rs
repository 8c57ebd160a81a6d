use serde::{Deserialize, Serialize};

use crate::model::FilterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKeyType {
    Attribute,
    TimeSeries,
    EntityField,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    #[serde(rename = "type")]
    pub key_type: EntityKeyType,
    pub key: String,
}

impl EntityKey {
    pub fn attribute(key: impl Into<String>) -> Self { Self { key_type: EntityKeyType::Attribute, key: key.into() } }
    pub fn time_series(key: impl Into<String>) -> Self { Self { key_type: EntityKeyType::TimeSeries, key: key.into() } }
    pub fn entity_field(key: impl Into<String>) -> Self { Self { key_type: EntityKeyType::EntityField, key: key.into() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKeyValueType {
    String,
    Numeric,
    Boolean,
    DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StringOperation {
    Equal,
    NotEqual,
    StartsWith,
    EndsWith,
    Contains,
    NotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumericOperation {
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BooleanOperation {
    Equal,
    NotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplexOperation {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum KeyFilterPredicate {
    String {
        operation: StringOperation,
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    Numeric {
        operation: NumericOperation,
        value: f64,
    },
    Boolean {
        operation: BooleanOperation,
        value: bool,
    },
    Complex {
        operation: ComplexOperation,
        predicates: Vec<KeyFilterPredicate>,
    },
}

/// A predicate over one entity key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFilter {
    pub key: EntityKey,
    pub value_type: EntityKeyValueType,
    pub predicate: KeyFilterPredicate,
}

/// A named, reusable set of key filters.
///
/// The same type is used for session-scoped user overrides, which are keyed by the id of the
/// definition they replace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDefinition {
    pub id: FilterId,
    /// Display name of the filter
    pub filter: String,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub key_filters: Vec<KeyFilter>,
}

impl FilterDefinition {
    pub fn new(id: impl Into<FilterId>, filter: impl Into<String>, key_filters: Vec<KeyFilter>) -> Self {
        Self { id: id.into(), filter: filter.into(), editable: true, key_filters }
    }
}
