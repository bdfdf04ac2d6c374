use std::collections::HashSet;

use agent_provider::Turn;

use crate::error::SessionStoreError;
use crate::store::SessionStore;

impl SessionStore {
    /// Rebuilds the transcript from the root down to `target_leaf`, or to the
    /// current leaf when `None`. Sibling branches are skipped.
    pub fn replay_leaf(&self, target_leaf: Option<&str>) -> Result<Vec<Turn>, SessionStoreError> {
        let Some(leaf_id) = target_leaf.or(self.current_leaf_id.as_deref()) else {
            return Ok(Vec::new());
        };
        let unknown = || SessionStoreError::UnknownLeafId {
            path: self.path.clone(),
            leaf_id: leaf_id.to_string(),
        };

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = Some(leaf_id);
        while let Some(id) = cursor {
            if !visited.insert(id) {
                return Err(SessionStoreError::ReplayCycle {
                    path: self.path.clone(),
                    leaf_id: leaf_id.to_string(),
                });
            }
            let index = *self.index_by_id.get(id).ok_or_else(unknown)?;
            let entry = &self.entries[index];
            chain.push(entry.kind.clone());
            cursor = entry.parent_id.as_deref();
        }

        Ok(chain.into_iter().rev().map(Turn::from).collect())
    }
}
