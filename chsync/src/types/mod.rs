//! Core data types of the sync engine.

mod batch;
mod operation;
mod row;

pub use batch::{Batch, ResolvedBatch};
pub use operation::{ImportKey, Mutation, Operation, OperationId, OperationKind, PrimaryKey};
pub use row::{DestinationRow, ReplicaAlias, RowVersion, SourceRow};
