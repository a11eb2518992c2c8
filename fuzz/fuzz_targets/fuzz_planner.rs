#![no_main]

use std::collections::BTreeSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use thermobus::{BatchPlanner, RegisterDescriptor, RegisterKind, TRANSACTION_LIMIT};

#[derive(Debug, Arbitrary)]
struct Input {
    registers: Vec<(u8, u16)>,
}

fuzz_target!(|input: Input| {
    let keys: BTreeSet<(RegisterKind, u16)> = input
        .registers
        .iter()
        .map(|&(kind, address)| {
            let kind = match kind % 3 {
                0 => RegisterKind::Holding,
                1 => RegisterKind::Input,
                _ => RegisterKind::Custom,
            };
            (kind, address)
        })
        .collect();
    let descriptors: Vec<RegisterDescriptor> = keys
        .iter()
        .map(|&(kind, address)| RegisterDescriptor::new(kind, address, ""))
        .collect();

    let plan = BatchPlanner::plan(&descriptors);

    let mut covered = Vec::new();
    for run in plan.runs() {
        assert!(run.count >= 1 && run.count <= TRANSACTION_LIMIT);
        assert!(run.kind.is_physical());
        covered.extend(run.addresses().map(|address| (run.kind, address)));
    }
    let expected: Vec<_> = keys.into_iter().filter(|(kind, _)| kind.is_physical()).collect();
    assert_eq!(covered, expected);
});
