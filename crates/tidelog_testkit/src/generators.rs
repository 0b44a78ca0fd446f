//! Property-based test generators using proptest.
//!
//! Workloads draw entities from a small range so transactions conflict
//! often, which is what exercises ordering during recovery.

use crate::crash::CrashDamage;
use proptest::prelude::*;
use tidelog_core::Command;

/// Number of distinct entities a generated workload touches.
pub const WORKLOAD_ENTITIES: u64 = 8;

/// Strategy for entity values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..32)
}

/// Strategy for one transaction's writes: `(entity, value)` pairs.
pub fn writes_strategy() -> impl Strategy<Value = Vec<(u64, Vec<u8>)>> {
    prop::collection::vec((0..WORKLOAD_ENTITIES, value_strategy()), 1..5)
}

/// Strategy for a workload of up to `max_transactions` transactions.
pub fn workload_strategy(max_transactions: usize) -> impl Strategy<Value = Vec<Vec<(u64, Vec<u8>)>>> {
    prop::collection::vec(writes_strategy(), 1..=max_transactions.max(1))
}

/// Strategy for tail damage a crash can leave on the newest segment.
pub fn tail_damage_strategy() -> impl Strategy<Value = CrashDamage> {
    prop_oneof![
        (1u64..40).prop_map(CrashDamage::TornTail),
        (1u64..256).prop_map(CrashDamage::ZeroPadding),
    ]
}

/// Turns writes into commands with correct before images.
///
/// `state` holds the current value of every entity and is updated as the
/// writes are applied.
pub fn commands_for(
    writes: &[(u64, Vec<u8>)],
    state: &mut std::collections::BTreeMap<u64, Vec<u8>>,
) -> Vec<Command> {
    writes
        .iter()
        .map(|(entity, value)| {
            let before = state.insert(*entity, value.clone());
            Command {
                entity: *entity,
                before,
                after: Some(value.clone()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    proptest! {
        #[test]
        fn commands_chain_before_images(writes in writes_strategy()) {
            let mut state = BTreeMap::new();
            let commands = commands_for(&writes, &mut state);
            let mut seen: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
            for command in &commands {
                prop_assert_eq!(command.before.clone(), seen.get(&command.entity).cloned());
                seen.insert(command.entity, command.after.clone().unwrap());
            }
            prop_assert_eq!(seen, state);
        }
    }
}
