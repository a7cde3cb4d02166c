//! Logical add/update/delete over an append-only vector store.
//!
//! The store and its [`PositionMap`] form one unit, [`IndexState`]. Appends
//! extend both in place. Updates and deletes reconstruct every live vector
//! into a new store built off to the side, then replace the whole unit in a
//! single assignment. Any failure before that assignment leaves the previous
//! pair untouched.
//!
//! Callers that share an `IndexState` between threads must hold an exclusive
//! lock across each mutating call; readers take the shared side of the same
//! lock so they only ever see a complete pair.

use crate::position_map::PositionMap;
use crate::types::RecordId;
use crate::vector_index::{check_vector, VectorIndex};
use kbvec_core::{AppError, AppResult};

/// How a mutation was applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Vector appended at the store's next position
    Appended { position: usize },
    /// Store and map were rebuilt; `count` is the new live count
    Rebuilt { count: usize },
}

/// A vector store together with the map describing its positions.
#[derive(Debug)]
pub struct IndexState {
    store: Box<dyn VectorIndex>,
    map: PositionMap,
}

impl IndexState {
    /// Wrap an empty store.
    pub fn new(store: Box<dyn VectorIndex>) -> AppResult<Self> {
        if store.count() != 0 {
            return Err(AppError::Index(format!(
                "Expected an empty store, found {} vectors",
                store.count()
            )));
        }

        Ok(Self {
            store,
            map: PositionMap::new(),
        })
    }

    /// Build a populated state in one bulk construction.
    ///
    /// `template` only supplies the flavor; the result uses a fresh store.
    pub fn from_entries(
        template: &dyn VectorIndex,
        entries: Vec<(RecordId, Vec<f32>)>,
    ) -> AppResult<Self> {
        let (ids, vectors): (Vec<RecordId>, Vec<Vec<f32>>) = entries.into_iter().unzip();

        let map = PositionMap::from_ids(ids)?;
        let mut store = template.empty_like();
        store.add_batch(&vectors)?;

        let state = Self { store, map };
        state.check_consistency()?;
        Ok(state)
    }

    pub fn store(&self) -> &dyn VectorIndex {
        self.store.as_ref()
    }

    pub fn map(&self) -> &PositionMap {
        &self.map
    }

    /// Number of live vectors.
    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.map.contains(id)
    }

    /// Current vector of a live identifier.
    pub fn vector_of(&self, id: RecordId) -> AppResult<Option<Vec<f32>>> {
        match self.map.position_of(id) {
            Some(position) => self.store.reconstruct(position).map(Some),
            None => Ok(None),
        }
    }

    /// Add a record, or update it if the identifier is already live.
    pub fn add(&mut self, id: RecordId, vector: &[f32]) -> AppResult<MutationOutcome> {
        if self.map.contains(id) {
            tracing::warn!(
                "Vector for record {} already exists, updating instead of adding",
                id
            );
            return self.rebuild_replacing(id, vector);
        }

        self.append(id, vector)
    }

    /// Update a record, or add it if the identifier is not live.
    pub fn update(&mut self, id: RecordId, vector: &[f32]) -> AppResult<MutationOutcome> {
        if !self.map.contains(id) {
            tracing::info!("Record {} has no vector yet, adding instead of updating", id);
            return self.append(id, vector);
        }

        self.rebuild_replacing(id, vector)
    }

    /// Remove a record. Returns `false` when the identifier is not live.
    pub fn delete(&mut self, id: RecordId) -> AppResult<bool> {
        if !self.map.contains(id) {
            tracing::warn!("Vector for record {} not found in index", id);
            return Ok(false);
        }

        let next = self.rebuild(id, None)?;
        *self = next;

        if self.count() == 0 {
            tracing::info!("Index empty after deleting last vector (record {})", id);
        } else {
            tracing::info!(
                "Rebuilt index without record {} ({} vectors remain)",
                id,
                self.count()
            );
        }
        Ok(true)
    }

    /// Verify the store size and map agree exactly.
    pub fn check_consistency(&self) -> AppResult<()> {
        self.map.check()?;

        if self.store.count() != self.map.len() {
            return Err(AppError::Invariant(format!(
                "Store holds {} vectors but map tracks {} records",
                self.store.count(),
                self.map.len()
            )));
        }

        Ok(())
    }

    fn append(&mut self, id: RecordId, vector: &[f32]) -> AppResult<MutationOutcome> {
        check_vector(self.store.dimension(), vector)?;

        let position = self.store.add(vector)?;
        let mapped = self.map.push(id)?;
        if position != mapped {
            return Err(AppError::Invariant(format!(
                "Store appended record {} at {} but map assigned {}",
                id, position, mapped
            )));
        }

        tracing::info!(
            "Added record {} at position {} (index size {})",
            id,
            position,
            self.count()
        );
        Ok(MutationOutcome::Appended { position })
    }

    fn rebuild_replacing(&mut self, id: RecordId, vector: &[f32]) -> AppResult<MutationOutcome> {
        check_vector(self.store.dimension(), vector)?;

        let next = self.rebuild(id, Some(vector))?;
        *self = next;

        tracing::info!("Rebuilt index with new vector for record {}", id);
        Ok(MutationOutcome::Rebuilt {
            count: self.count(),
        })
    }

    /// Build a replacement state from the live set.
    ///
    /// `target` gets `replacement` as its vector, or is dropped when
    /// `replacement` is `None`. Survivors keep their relative order.
    fn rebuild(&self, target: RecordId, replacement: Option<&[f32]>) -> AppResult<IndexState> {
        let mut entries = Vec::with_capacity(self.map.len());

        for (position, id) in self.map.iter() {
            if id == target {
                if let Some(vector) = replacement {
                    entries.push((id, vector.to_vec()));
                }
                continue;
            }

            let vector = self
                .store
                .reconstruct(position)
                .map_err(|e| AppError::Rebuild {
                    id: target,
                    phase: "reconstruct",
                    reason: e.to_string(),
                })?;
            entries.push((id, vector));
        }

        IndexState::from_entries(self.store.as_ref(), entries).map_err(|e| match e {
            AppError::DimensionMismatch { .. } => e,
            other => AppError::Rebuild {
                id: target,
                phase: "construct",
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metric;
    use crate::vector_index::FlatIndex;

    fn empty_state(dimension: usize) -> IndexState {
        IndexState::new(Box::new(FlatIndex::new(Metric::InnerProduct, dimension).unwrap()))
            .unwrap()
    }

    fn unit(dimension: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    /// Every live identifier round-trips and positions are exactly 0..count.
    fn assert_dense(state: &IndexState) {
        state.check_consistency().unwrap();
        let mut positions: Vec<usize> = state
            .map()
            .iter()
            .map(|(_, id)| state.map().position_of(id).unwrap())
            .collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..state.count()).collect::<Vec<_>>());
        for (position, id) in state.map().iter() {
            assert_eq!(state.map().id_at(position), Some(id));
        }
    }

    #[test]
    fn test_add_appends() {
        let mut state = empty_state(3);
        assert_eq!(
            state.add(1, &unit(3, 0)).unwrap(),
            MutationOutcome::Appended { position: 0 }
        );
        assert_eq!(
            state.add(2, &unit(3, 1)).unwrap(),
            MutationOutcome::Appended { position: 1 }
        );
        assert_eq!(state.count(), 2);
        assert_eq!(state.vector_of(2).unwrap(), Some(unit(3, 1)));
        assert_dense(&state);
    }

    #[test]
    fn test_add_existing_redirects_to_update() {
        let mut state = empty_state(3);
        state.add(1, &unit(3, 0)).unwrap();
        state.add(2, &unit(3, 1)).unwrap();

        let outcome = state.add(1, &unit(3, 2)).unwrap();
        assert_eq!(outcome, MutationOutcome::Rebuilt { count: 2 });
        assert_eq!(state.vector_of(1).unwrap(), Some(unit(3, 2)));
        assert_dense(&state);
    }

    #[test]
    fn test_update_missing_redirects_to_add() {
        let mut state = empty_state(2);
        let outcome = state.update(5, &unit(2, 0)).unwrap();
        assert_eq!(outcome, MutationOutcome::Appended { position: 0 });
        assert!(state.contains(5));
    }

    #[test]
    fn test_update_twice_keeps_count() {
        let mut state = empty_state(3);
        state.add(1, &unit(3, 0)).unwrap();
        state.add(2, &unit(3, 1)).unwrap();

        state.update(2, &unit(3, 2)).unwrap();
        state.update(2, &unit(3, 0)).unwrap();

        assert_eq!(state.count(), 2);
        assert_eq!(state.vector_of(2).unwrap(), Some(unit(3, 0)));
        assert_eq!(state.vector_of(1).unwrap(), Some(unit(3, 0)));
        assert_dense(&state);
    }

    #[test]
    fn test_delete_rebuilds_without_target() {
        let mut state = empty_state(3);
        for (id, axis) in [(1, 0), (2, 1), (3, 2)] {
            state.add(id, &unit(3, axis)).unwrap();
        }

        assert!(state.delete(2).unwrap());
        assert_eq!(state.count(), 2);
        assert!(!state.contains(2));
        assert_eq!(state.vector_of(3).unwrap(), Some(unit(3, 2)));
        assert_dense(&state);
    }

    #[test]
    fn test_delete_missing_returns_false() {
        let mut state = empty_state(2);
        state.add(1, &unit(2, 0)).unwrap();
        assert!(!state.delete(99).unwrap());
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn test_delete_last_leaves_empty_store_of_same_flavor() {
        let mut state = IndexState::new(Box::new(FlatIndex::new(Metric::L2, 2).unwrap())).unwrap();
        state.add(1, &[0.5, 0.5]).unwrap();
        assert!(state.delete(1).unwrap());
        assert_eq!(state.count(), 0);
        assert!(state.map().is_empty());
        assert_eq!(state.store().metric(), Metric::L2);
        assert_eq!(state.store().dimension(), 2);
    }

    #[test]
    fn test_delete_then_add_restores_count() {
        let mut state = empty_state(3);
        for (id, axis) in [(1, 0), (2, 1), (3, 2)] {
            state.add(id, &unit(3, axis)).unwrap();
        }
        let before = state.count();

        state.delete(1).unwrap();
        state.add(1, &unit(3, 1)).unwrap();

        assert_eq!(state.count(), before);
        assert_eq!(state.vector_of(1).unwrap(), Some(unit(3, 1)));
        assert_dense(&state);
    }

    #[test]
    fn test_failed_update_leaves_state_intact() {
        let mut state = empty_state(3);
        state.add(1, &unit(3, 0)).unwrap();
        state.add(2, &unit(3, 1)).unwrap();

        let err = state.update(1, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));
        assert_eq!(state.count(), 2);
        assert_eq!(state.vector_of(1).unwrap(), Some(unit(3, 0)));
        assert_dense(&state);

        assert!(state.add(3, &[1.0]).is_err());
        assert!(matches!(
            state.update(2, &[f32::NAN, 0.0, 0.0]),
            Err(AppError::Index(_))
        ));
        assert_eq!(state.vector_of(2).unwrap(), Some(unit(3, 1)));
        assert_eq!(state.count(), 2);
        assert!(!state.contains(3));
    }

    #[test]
    fn test_mixed_sequence_keeps_invariants() {
        let mut state = empty_state(4);
        let ops: [(char, RecordId, usize); 10] = [
            ('a', 1, 0),
            ('a', 2, 1),
            ('a', 3, 2),
            ('u', 2, 3),
            ('d', 1, 0),
            ('a', 4, 0),
            ('u', 9, 1),
            ('d', 3, 0),
            ('a', 2, 2),
            ('d', 4, 0),
        ];

        for (op, id, axis) in ops {
            match op {
                'a' => {
                    state.add(id, &unit(4, axis)).unwrap();
                }
                'u' => {
                    state.update(id, &unit(4, axis)).unwrap();
                }
                _ => {
                    state.delete(id).unwrap();
                }
            }
            assert_dense(&state);
        }

        let mut live: Vec<RecordId> = state.map().iter().map(|(_, id)| id).collect();
        live.sort_unstable();
        assert_eq!(live, vec![2, 9]);
        assert_eq!(state.vector_of(2).unwrap(), Some(unit(4, 2)));
    }

    #[test]
    fn test_from_entries_bulk_build() {
        let template = FlatIndex::new(Metric::InnerProduct, 2).unwrap();
        let state = IndexState::from_entries(
            &template,
            vec![(10, vec![1.0, 0.0]), (20, vec![0.0, 1.0])],
        )
        .unwrap();
        assert_eq!(state.count(), 2);
        assert_eq!(state.map().position_of(20), Some(1));

        assert!(IndexState::from_entries(
            &template,
            vec![(10, vec![1.0, 0.0]), (10, vec![0.0, 1.0])]
        )
        .is_err());
    }
}
