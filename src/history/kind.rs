//! State-kind strategies
//!
//! A [`StateKind`] teaches the history engine how to compare, patch and
//! step one concrete state type. The engine itself only looks at
//! timestamps and ordering.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Diff/apply/pre-step capability for one state type.
///
/// Implementations must satisfy, for any `a` and `b`:
///
/// - `apply(a, diff(a, b))` reproduces `b`
/// - `is_empty(diff(a, a))`
///
/// The log checks the first law in debug builds after every record.
pub trait StateKind {
    /// Materialized snapshot. Never mutated in place by the engine except
    /// through [`StateKind::before_step`] on a cursor's private copy.
    type State: Clone + Debug;

    /// Change payload carried on the wire.
    type Delta: Clone + Debug + PartialEq + Serialize + DeserializeOwned;

    /// Produce the delta that turns `from` into `to`.
    fn diff(&self, from: &Self::State, to: &Self::State) -> Self::Delta;

    /// Return a new state with `delta` applied to `state`.
    fn apply(&self, state: &Self::State, delta: &Self::Delta) -> Self::State;

    /// Whether `delta` carries no change at all.
    fn is_empty(&self, delta: &Self::Delta) -> bool;

    /// Hook run on a cursor's state before the deltas of one step are
    /// applied. Used to clear one-shot flags.
    fn before_step(&self, _state: &mut Self::State) {}
}


#[cfg(test)]
mod tests {
    use super::testing::Counter;
    use super::StateKind;

    #[test]
    fn counter_obeys_round_trip_law() {
        let kind = Counter;
        for (a, b) in [(0, 0), (0, 5), (7, -3)] {
            let delta = kind.diff(&a, &b);
            assert_eq!(kind.apply(&a, &delta), b);
        }
        assert!(kind.is_empty(&kind.diff(&4, &4)));
    }
}
