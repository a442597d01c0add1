//! Member-level set comparison.

use std::collections::HashSet;
use std::hash::Hash;

/// Members present on only one side, each list ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    /// In the hot set, absent from the durable rows.
    pub missing_in_cold: Vec<T>,
    /// In the durable rows, absent from the hot set.
    pub missing_in_hot: Vec<T>,
}

impl<T> SetDiff<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_in_cold.is_empty() && self.missing_in_hot.is_empty()
    }
}

#[must_use]
pub fn diff_sets<T: Eq + Hash + Ord + Clone>(hot: &HashSet<T>, cold: &HashSet<T>) -> SetDiff<T> {
    let mut missing_in_cold: Vec<T> = hot.difference(cold).cloned().collect();
    let mut missing_in_hot: Vec<T> = cold.difference(hot).cloned().collect();
    missing_in_cold.sort_unstable();
    missing_in_hot.sort_unstable();
    SetDiff {
        missing_in_cold,
        missing_in_hot,
    }
}
