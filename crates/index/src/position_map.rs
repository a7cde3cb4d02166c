//! Bidirectional record identifier <-> store position mapping.

use crate::types::RecordId;
use kbvec_core::{AppError, AppResult};
use std::collections::HashMap;

/// Maps live identifiers to store positions and back.
///
/// Positions always form the dense range `[0, len)`. The inverse direction
/// is a vector indexed by position, so it cannot contain gaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMap {
    id_to_position: HashMap<RecordId, usize>,
    position_to_id: Vec<RecordId>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map that assigns positions in iteration order.
    ///
    /// Fails on duplicate identifiers.
    pub fn from_ids<I>(ids: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut map = Self::new();
        for id in ids {
            map.push(id)?;
        }
        Ok(map)
    }

    /// Assign the next position to `id`.
    pub fn push(&mut self, id: RecordId) -> AppResult<usize> {
        if self.id_to_position.contains_key(&id) {
            return Err(AppError::Invariant(format!(
                "Record {} already has a position",
                id
            )));
        }

        let position = self.position_to_id.len();
        self.id_to_position.insert(id, position);
        self.position_to_id.push(id);
        Ok(position)
    }

    pub fn position_of(&self, id: RecordId) -> Option<usize> {
        self.id_to_position.get(&id).copied()
    }

    pub fn id_at(&self, position: usize) -> Option<RecordId> {
        self.position_to_id.get(position).copied()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.id_to_position.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.position_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position_to_id.is_empty()
    }

    /// `(position, id)` pairs in position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, RecordId)> + '_ {
        self.position_to_id.iter().copied().enumerate()
    }

    /// Verify both directions are exact inverses.
    pub fn check(&self) -> AppResult<()> {
        if self.id_to_position.len() != self.position_to_id.len() {
            return Err(AppError::Invariant(format!(
                "Map sizes differ: {} identifiers, {} positions",
                self.id_to_position.len(),
                self.position_to_id.len()
            )));
        }

        for (position, id) in self.iter() {
            if self.position_of(id) != Some(position) {
                return Err(AppError::Invariant(format!(
                    "Position {} maps to record {} but record maps to {:?}",
                    position,
                    id,
                    self.position_of(id)
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_sequential_positions() {
        let mut map = PositionMap::new();
        assert_eq!(map.push(10).unwrap(), 0);
        assert_eq!(map.push(4).unwrap(), 1);
        assert_eq!(map.position_of(4), Some(1));
        assert_eq!(map.id_at(0), Some(10));
        assert_eq!(map.id_at(2), None);
        assert!(map.check().is_ok());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut map = PositionMap::new();
        map.push(1).unwrap();
        assert!(map.push(1).is_err());
        assert_eq!(map.len(), 1);

        assert!(PositionMap::from_ids([1, 2, 1]).is_err());
    }

    #[test]
    fn test_iter_in_position_order() {
        let map = PositionMap::from_ids([7, 3, 9]).unwrap();
        let pairs: Vec<(usize, RecordId)> = map.iter().collect();
        assert_eq!(pairs, vec![(0, 7), (1, 3), (2, 9)]);
    }
}
