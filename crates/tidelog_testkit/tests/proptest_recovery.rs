//! Property tests: recovery after random workloads and crashes.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tidelog_core::log::LOG_HEADER_SIZE;
use tidelog_testkit::prelude::*;

/// Small enough that most workloads span several segments.
const ROTATION_THRESHOLD: u64 = 512;

type Writes = Vec<(u64, Vec<u8>)>;

fn apply_writes(model: &mut BTreeMap<u64, Vec<u8>>, writes: &Writes) {
    for (entity, value) in writes {
        model.insert(*entity, value.clone());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn recovery_keeps_exactly_the_surviving_commits(
        workload in workload_strategy(40),
        damage in tail_damage_strategy(),
    ) {
        let mut logs = TestLogs::memory()
            .with_log_config(LogConfig::default().rotation_threshold(ROTATION_THRESHOLD));
        let mut state = BTreeMap::new();
        let mut commits = Vec::new();
        for (i, writes) in workload.iter().enumerate() {
            let (_, end) = logs.commit(i as u64 + 1, commands_for(writes, &mut state));
            commits.push((end, writes.clone()));
        }
        logs.close_writer();

        let highest = *logs.versions().last().unwrap();
        let size = logs.segment_size(highest);
        let damage = match damage {
            CrashDamage::TornTail(n) => CrashDamage::TornTail(n.min(size - LOG_HEADER_SIZE)),
            other => other,
        };
        inflict(logs.store().as_ref(), highest, damage);
        let damaged_size = logs.segment_size(highest);

        let mut model = BTreeMap::new();
        let mut survivors = 0u64;
        for (end, writes) in &commits {
            if end.segment_version < highest || end.byte_offset <= damaged_size {
                apply_writes(&mut model, writes);
                survivors += 1;
            }
        }

        let storage = Arc::new(RecordingStorageEngine::new());
        let outcome = logs.recover(&storage, RecoveryConfig::default()).unwrap();
        prop_assert_eq!(outcome.recovered_transactions, survivors);
        prop_assert_eq!(storage.values(), model);
        prop_assert_eq!(
            storage.stored_metadata().last_committed_tx,
            TransactionId::new(survivors)
        );

        let snapshot = logs.snapshot();
        let values = storage.values();
        storage.clear_journals();
        let again = logs.recover(&storage, RecoveryConfig::default()).unwrap();
        prop_assert!(!again.recovery_performed);
        prop_assert_eq!(logs.snapshot(), snapshot);
        prop_assert_eq!(storage.values(), values);
        prop_assert!(storage.applied().is_empty());
    }

    #[test]
    fn parallel_replay_matches_sequential(workload in workload_strategy(30)) {
        let build = || {
            let mut logs = TestLogs::memory()
                .with_log_config(LogConfig::default().rotation_threshold(ROTATION_THRESHOLD));
            let mut state = BTreeMap::new();
            for (i, writes) in workload.iter().enumerate() {
                logs.commit(i as u64 + 1, commands_for(writes, &mut state));
            }
            logs
        };

        let sequential = Arc::new(RecordingStorageEngine::new());
        build().recover(&sequential, RecoveryConfig::default()).unwrap();

        let parallel = Arc::new(RecordingStorageEngine::new());
        build()
            .recover(&parallel, RecoveryConfig::default().parallel_recovery(true).parallel_workers(3))
            .unwrap();

        prop_assert_eq!(parallel.values(), sequential.values());
        prop_assert_eq!(parallel.lock_order(), sequential.applied_in(ApplicationMode::Recovery));
    }
}
