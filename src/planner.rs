//! # Read Planning
//!
//! Groups the physical registers of one device profile into the smallest
//! ordered list of contiguous bus transactions.
//!
//! ## How It Works
//!
//! Registers are sorted by `(kind, address)` and scanned once. The current run
//! is extended while the kind matches, the address directly follows the
//! previous one and the run holds fewer than [`TRANSACTION_LIMIT`] registers;
//! otherwise the run is closed and a new one starts. Custom registers never
//! take part in planning.
//!
//! ## Example
//!
//! ```rust
//! use thermobus::planner::BatchPlanner;
//! use thermobus::register::{RegisterDescriptor, RegisterKind};
//!
//! let registers: Vec<_> = [(RegisterKind::Input, 5), (RegisterKind::Input, 9),
//!                          (RegisterKind::Input, 6), (RegisterKind::Holding, 5),
//!                          (RegisterKind::Input, 7)]
//!     .into_iter()
//!     .map(|(kind, address)| RegisterDescriptor::new(kind, address, ""))
//!     .collect();
//!
//! let plan = BatchPlanner::plan(&registers);
//! assert_eq!(plan.len(), 3);
//! ```

use std::fmt;

use crate::constants::TRANSACTION_LIMIT;
use crate::register::{RegisterDescriptor, RegisterKind};

/// One contiguous same-kind read transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRun {
    pub kind: RegisterKind,
    pub start: u16,
    /// Number of registers, in `1..=TRANSACTION_LIMIT`.
    pub count: u16,
}

impl RegisterRun {
    /// Last address covered by the run.
    #[inline]
    pub fn end(&self) -> u16 {
        self.start.saturating_add(self.count.saturating_sub(1))
    }

    /// Addresses covered by the run, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        (0..self.count).map(move |i| start + i)
    }

    #[inline]
    pub fn contains(&self, kind: RegisterKind, address: u16) -> bool {
        self.count > 0 && self.kind == kind && address >= self.start && address <= self.end()
    }
}

impl fmt::Display for RegisterRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}]", self.kind, self.start, self.end())
    }
}

/// Ordered list of read transactions for one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPlan {
    runs: Vec<RegisterRun>,
}

impl TransactionPlan {
    pub fn runs(&self) -> &[RegisterRun] {
        &self.runs
    }

    /// Number of bus transactions.
    #[inline]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of registers covered by the plan.
    pub fn register_count(&self) -> usize {
        self.runs.iter().map(|run| run.count as usize).sum()
    }
}

impl<'a> IntoIterator for &'a TransactionPlan {
    type Item = &'a RegisterRun;
    type IntoIter = std::slice::Iter<'a, RegisterRun>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.iter()
    }
}

/// Read planner.
///
/// Pure and deterministic: performs no I/O and depends only on its input.
pub struct BatchPlanner;

impl BatchPlanner {
    /// Plan the physical registers among `registers`.
    pub fn plan<'a, I>(registers: I) -> TransactionPlan
    where
        I: IntoIterator<Item = &'a RegisterDescriptor>,
    {
        let mut keys: Vec<(RegisterKind, u16)> = registers
            .into_iter()
            .filter(|d| d.kind.is_physical())
            .map(|d| (d.kind, d.address))
            .collect();
        // Stable sort keeps declaration order for equal keys
        keys.sort();

        let mut runs: Vec<RegisterRun> = Vec::with_capacity(keys.len() / 4 + 1);
        for (kind, address) in keys {
            if let Some(run) = runs.last_mut() {
                let follows = run.end().checked_add(1) == Some(address);
                if run.kind == kind && follows && run.count < TRANSACTION_LIMIT {
                    run.count += 1;
                    continue;
                }
            }
            runs.push(RegisterRun {
                kind,
                start: address,
                count: 1,
            });
        }

        TransactionPlan { runs }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn descriptors(keys: &[(RegisterKind, u16)]) -> Vec<RegisterDescriptor> {
        keys.iter()
            .map(|&(kind, address)| RegisterDescriptor::new(kind, address, ""))
            .collect()
    }

    fn run(kind: RegisterKind, start: u16, count: u16) -> RegisterRun {
        RegisterRun { kind, start, count }
    }

    #[test]
    fn test_empty_input() {
        let plan = BatchPlanner::plan(&Vec::<RegisterDescriptor>::new());
        assert!(plan.is_empty());
        assert_eq!(plan.register_count(), 0);
    }

    #[test]
    fn test_gap_and_kind_split_runs() {
        let registers = descriptors(&[
            (RegisterKind::Input, 9),
            (RegisterKind::Holding, 5),
            (RegisterKind::Input, 7),
            (RegisterKind::Input, 5),
            (RegisterKind::Input, 6),
        ]);
        let plan = BatchPlanner::plan(&registers);
        assert_eq!(
            plan.runs(),
            &[
                run(RegisterKind::Holding, 5, 1),
                run(RegisterKind::Input, 5, 3),
                run(RegisterKind::Input, 9, 1),
            ]
        );
    }

    #[test]
    fn test_transaction_limit_splits_long_runs() {
        let keys: Vec<_> = (100..145).map(|a| (RegisterKind::Holding, a)).collect();
        let plan = BatchPlanner::plan(&descriptors(&keys));
        assert_eq!(
            plan.runs(),
            &[
                run(RegisterKind::Holding, 100, 20),
                run(RegisterKind::Holding, 120, 20),
                run(RegisterKind::Holding, 140, 5),
            ]
        );
    }

    #[test]
    fn test_custom_registers_excluded() {
        let mut registers = descriptors(&[(RegisterKind::Holding, 1), (RegisterKind::Holding, 3)]);
        registers.push(
            RegisterDescriptor::new(RegisterKind::Custom, 2, "Panel")
                .with_resolver("TempPanelRegister", json!({})),
        );
        let plan = BatchPlanner::plan(&registers);
        assert_eq!(plan.len(), 2);
        assert!(plan.runs().iter().all(|r| r.kind != RegisterKind::Custom));
    }

    #[test]
    fn test_address_space_end() {
        let registers = descriptors(&[(RegisterKind::Input, u16::MAX - 1), (RegisterKind::Input, u16::MAX)]);
        let plan = BatchPlanner::plan(&registers);
        assert_eq!(plan.runs(), &[run(RegisterKind::Input, u16::MAX - 1, 2)]);
        assert_eq!(plan.runs()[0].end(), u16::MAX);
    }

    #[test]
    fn test_run_display_and_contains() {
        let r = run(RegisterKind::Input, 5, 3);
        assert_eq!(r.to_string(), "input[5..7]");
        assert!(r.contains(RegisterKind::Input, 7));
        assert!(!r.contains(RegisterKind::Input, 8));
        assert!(!r.contains(RegisterKind::Holding, 5));
        assert_eq!(r.addresses().collect::<Vec<_>>(), vec![5, 6, 7]);
    }

    #[test]
    fn test_empty_run_is_harmless() {
        let r = run(RegisterKind::Holding, 0, 0);
        assert_eq!(r.end(), 0);
        assert_eq!(r.to_string(), "holding[0..0]");
        assert!(!r.contains(RegisterKind::Holding, 0));
        assert_eq!(r.addresses().count(), 0);
    }

    fn kind_strategy() -> impl Strategy<Value = RegisterKind> {
        prop_oneof![Just(RegisterKind::Holding), Just(RegisterKind::Input)]
    }

    proptest! {
        #[test]
        fn prop_plan_covers_each_register_once(
            keys in prop::collection::btree_set((kind_strategy(), 0u16..300), 0..150)
        ) {
            // Feed in reverse so the planner has to sort
            let input: Vec<_> = keys.iter().rev().copied().collect();
            let plan = BatchPlanner::plan(&descriptors(&input));

            let mut covered = Vec::new();
            for r in plan.runs() {
                prop_assert!(r.count >= 1 && r.count <= TRANSACTION_LIMIT);
                covered.extend(r.addresses().map(|a| (r.kind, a)));
            }
            let expected: Vec<_> = keys.into_iter().collect();
            prop_assert_eq!(covered, expected);
        }

        #[test]
        fn prop_adjacent_runs_could_not_merge(
            keys in prop::collection::btree_set((kind_strategy(), 0u16..100), 1..120)
        ) {
            let input: Vec<_> = keys.into_iter().collect();
            let plan = BatchPlanner::plan(&descriptors(&input));
            for pair in plan.runs().windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let mergeable = a.kind == b.kind
                    && a.end() + 1 == b.start
                    && a.count < TRANSACTION_LIMIT;
                prop_assert!(!mergeable, "{} and {} should be one run", a, b);
            }
        }
    }
}
