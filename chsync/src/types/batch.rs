use std::collections::HashMap;

use crate::types::{ImportKey, Operation, OperationId, OperationKind, PrimaryKey};

/// Oldest pending operations of one import key, drained for a single round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub import_key: ImportKey,
    operations: Vec<Operation>,
}

impl Batch {
    /// Creates a batch, ordering the operations by enqueue order.
    pub fn new(import_key: ImportKey, mut operations: Vec<Operation>) -> Self {
        operations.sort_by_key(|operation| operation.id);

        Self {
            import_key,
            operations,
        }
    }

    pub fn empty(import_key: ImportKey) -> Self {
        Self {
            import_key,
            operations: Vec::new(),
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation_ids(&self) -> Vec<OperationId> {
        self.operations.iter().map(|operation| operation.id).collect()
    }

    /// Collapses the batch into one final intent per primary key.
    ///
    /// The last operation by enqueue order wins. Keys whose last operation is a delete end up
    /// in [`ResolvedBatch::deletes`] and are not written.
    pub fn resolve(&self) -> ResolvedBatch {
        let mut last_intent: HashMap<&PrimaryKey, (usize, OperationKind)> = HashMap::new();

        for (position, operation) in self.operations.iter().enumerate() {
            last_intent.insert(&operation.primary_key, (position, operation.kind));
        }

        let mut intents: Vec<_> = last_intent.into_iter().collect();
        intents.sort_by_key(|(_, (position, _))| *position);

        let mut resolved = ResolvedBatch::default();
        for (primary_key, (_, kind)) in intents {
            if kind.is_constructive() {
                resolved.upserts.push(primary_key.clone());
            } else {
                resolved.deletes.push(primary_key.clone());
            }
        }

        resolved
    }
}

/// Final intent per primary key of a [`Batch`].
///
/// Keys keep the order of their last operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBatch {
    /// Keys whose current source state must be written.
    pub upserts: Vec<PrimaryKey>,
    /// Keys dropped from the insert set.
    pub deletes: Vec<PrimaryKey>,
}

impl ResolvedBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
    }
}
