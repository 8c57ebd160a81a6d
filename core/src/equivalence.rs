//! Structural equivalence over definitions and resolved entity identity.
//!
//! All definition types are closed data (no function-valued fields), so equivalence is derived
//! `PartialEq`. This module only adds the table diffing used when definitions are replaced
//! wholesale, and entity identity comparisons.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::model::{EntityId, EntityInfo};

/// The ids that differ between two versions of a definition table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDiff<K> {
    pub added: Vec<K>,
    pub modified: Vec<K>,
    pub removed: Vec<K>,
}

impl<K: Ord + Clone> TableDiff<K> {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty() }

    /// Every changed id, sorted
    pub fn changed(&self) -> Vec<K> {
        let all: BTreeSet<&K> = self.added.iter().chain(&self.modified).chain(&self.removed).collect();
        all.into_iter().cloned().collect()
    }
}

/// Compare two definition tables keyed by id. Each list in the result is sorted.
pub fn diff_tables<K, V>(old: &HashMap<K, V>, new: &HashMap<K, V>) -> TableDiff<K>
where
    K: Hash + Ord + Clone,
    V: PartialEq,
{
    let mut added = Vec::new();
    let mut modified = Vec::new();
    let mut removed = Vec::new();

    for (id, before) in old {
        match new.get(id) {
            Some(after) if after == before => {}
            Some(_) => modified.push(id.clone()),
            None => removed.push(id.clone()),
        }
    }
    for id in new.keys() {
        if !old.contains_key(id) {
            added.push(id.clone());
        }
    }

    added.sort();
    modified.sort();
    removed.sort();
    TableDiff { added, modified, removed }
}

/// Whether two optional entity references denote the same entity
pub fn same_entity(a: Option<&EntityId>, b: Option<&EntityId>) -> bool { a == b }

/// Whether two optional entity infos denote the same entity with the same display data
pub fn same_entity_info(a: Option<&EntityInfo>, b: Option<&EntityInfo>) -> bool { a == b }
