//! Keyspace statistics used to order atoms in a conjunctive plan.

use crate::concept::Label;

/// Approximate instance counts per type.
///
/// Counts may be stale or missing; planners must fall back to declaration
/// order when a count is `None`.
pub trait KeyspaceStatistics {
    fn instance_count(&self, label: &Label) -> Option<u64>;
}

/// Statistics source that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatistics;

impl KeyspaceStatistics for NoStatistics {
    fn instance_count(&self, _label: &Label) -> Option<u64> {
        None
    }
}
