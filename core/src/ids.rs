use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dense integer assigned to a document id (matrix row) or a term (matrix column).
pub type Idx = u32;

/// Bijection between opaque string ids and dense indices `0..len`.
///
/// Both directions are updated by `get_or_insert` only, so every id has
/// exactly one index and every index exactly one id. Serializes as the dense
/// id list; loading rebuilds the forward map and rejects duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct IdIndex {
    forward: HashMap<String, Idx>,
    backward: Vec<String>,
}

/// Document id ↔ row index.
pub type DocIndex = IdIndex;
/// Term ↔ column index.
pub type VocabIndex = IdIndex;

impl IdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of `id`, assigning the next free one on first sight.
    pub fn get_or_insert(&mut self, id: &str) -> Idx {
        if let Some(&idx) = self.forward.get(id) {
            return idx;
        }
        let idx = self.backward.len() as Idx;
        self.forward.insert(id.to_string(), idx);
        self.backward.push(id.to_string());
        idx
    }

    pub fn index_of(&self, id: &str) -> Option<Idx> {
        self.forward.get(id).copied()
    }

    pub fn id_of(&self, idx: Idx) -> Option<&str> {
        self.backward.get(idx as usize).map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.forward.contains_key(id)
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.backward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backward.is_empty()
    }

    /// (id, index) pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Idx)> + '_ {
        self.backward
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i as Idx))
    }
}

impl TryFrom<Vec<String>> for IdIndex {
    type Error = PipelineError;

    fn try_from(ids: Vec<String>) -> Result<Self> {
        let mut forward = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if forward.insert(id.clone(), i as Idx).is_some() {
                return Err(PipelineError::InvalidIndex(format!("id {id} appears twice")));
            }
        }
        Ok(Self { forward, backward: ids })
    }
}

impl From<IdIndex> for Vec<String> {
    fn from(index: IdIndex) -> Self {
        index.backward
    }
}
