use std::fmt::Debug;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Every rejection reason collected by
/// [`Runtime::first_to_fulfill`](crate::Runtime::first_to_fulfill) when no
/// input fulfilled.
///
/// Reasons are kept in the order the rejections arrived, which is settlement
/// order and not input order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[error("all {} deferred values were rejected", .reasons.len())]
pub struct AggregateFailure<E: Debug> {
    reasons: Vec<E>,
}

impl<E: Debug> AggregateFailure<E> {
    pub(crate) fn new() -> Self {
        Self {
            reasons: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, reason: E) {
        self.reasons.push(reason);
    }

    pub fn reasons(&self) -> &[E] {
        &self.reasons
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.reasons.iter()
    }

    pub fn into_reasons(self) -> Vec<E> {
        self.reasons
    }
}

impl<E: Debug> IntoIterator for AggregateFailure<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.reasons.into_iter()
    }
}

impl<'a, E: Debug> IntoIterator for &'a AggregateFailure<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.reasons.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::AggregateFailure;

    #[test]
    fn keeps_arrival_order() {
        let mut failure = AggregateFailure::new();
        failure.push("e2");
        failure.push("e1");
        assert_eq!(failure.reasons(), &["e2", "e1"]);
        assert_eq!(failure.len(), 2);
        assert_eq!(failure.into_reasons(), vec!["e2", "e1"]);
    }

    #[test]
    fn empty_failure() {
        let failure = AggregateFailure::<String>::new();
        assert!(failure.is_empty());
        assert_eq!(failure.iter().count(), 0);
    }

    #[test]
    fn display_counts_reasons() {
        let mut failure = AggregateFailure::new();
        failure.push(1);
        failure.push(2);
        failure.push(3);
        assert_eq!(failure.to_string(), "all 3 deferred values were rejected");
    }
}
