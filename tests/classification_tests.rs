//! Integration tests for run classification
//!
//! These tests drive the full pipeline: statistics in a measurement store,
//! classification through the run classifier, queries and run comparison.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use ecal_ghc::store::StoreResult;
use ecal_ghc::*;

fn ch(raw: u32) -> ChannelId {
    ChannelId::new(raw).unwrap()
}

fn set(flags: &[Flag]) -> FlagSet {
    flags.iter().copied().collect()
}

fn insert_pedestal(store: &mut MemoryMeasurementStore, run: &RunId, channel: ChannelId, gain: Gain, mean: f64, rms: f64) {
    store.insert(run, channel, StatisticKey::pedestal_on(gain, Moment::Mean), mean);
    store.insert(run, channel, StatisticKey::pedestal_on(gain, Moment::Rms), rms);
}

fn classify_single(gain: Gain, mean: f64, rms: f64) -> FlagSet {
    let run = RunId::from("ghc1");
    let channel = ch(1011000001);
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &run, channel, gain, mean, rms);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();
    rc.flags_for_channel(&run, channel).unwrap()
}

// ============================================================================
// Pedestal scenarios
// ============================================================================

#[test]
fn test_dead_by_mean() {
    assert_eq!(classify_single(Gain::G1, 0.5, 0.1), set(&[Flag::DeadPedestal(Gain::G1)]));
}

#[test]
fn test_dead_by_rms_suppresses_bad_pedestal() {
    assert_eq!(classify_single(Gain::G1, 210.0, 0.05), set(&[Flag::DeadPedestal(Gain::G1)]));
}

#[test]
fn test_bad_pedestal_without_noise() {
    assert_eq!(classify_single(Gain::G1, 235.0, 0.5), set(&[Flag::BadPedestal(Gain::G1)]));
}

#[test]
fn test_noisy_bad_pedestal() {
    assert_eq!(
        classify_single(Gain::G1, 50.0, 1.2),
        set(&[Flag::LargeRms(Gain::G1), Flag::BadPedestal(Gain::G1)])
    );
}

// ============================================================================
// Test pulse and laser
// ============================================================================

#[test]
fn test_test_pulse_population() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    // Barrel G1 average: (0 + 400 + 1600 + 1500 + 1500) / 5 = 1000
    let means = [
        (1011000001, 0.0),
        (1011000002, 400.0),
        (1011000003, 1600.0),
        (1011000004, 1500.0),
        (1011000005, 1500.0),
    ];
    for (raw, mean) in means {
        store.insert(&run, ch(raw), StatisticKey::test_pulse(Gain::G1, Moment::Mean), mean);
    }
    // Endcap channels do not enter the barrel average
    store.insert(&run, ch(2010000001), StatisticKey::test_pulse(Gain::G1, Moment::Mean), 100_000.0);

    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();

    assert_eq!(rc.flags_for_channel(&run, ch(1011000001)).unwrap(), set(&[Flag::DeadTestPulse(Gain::G1)]));
    assert_eq!(rc.flags_for_channel(&run, ch(1011000002)).unwrap(), set(&[Flag::LowTestPulse(Gain::G1)]));
    assert_eq!(rc.flags_for_channel(&run, ch(1011000003)).unwrap(), set(&[Flag::LargeTestPulse(Gain::G1)]));
    assert!(rc.flags_for_channel(&run, ch(1011000004)).unwrap().is_empty());
    // Alone in its population, the endcap channel is its own average
    assert!(rc.flags_for_channel(&run, ch(2010000001)).unwrap().is_empty());
}

#[test]
fn test_test_pulse_subdetector_without_data_reports_each_gain() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    store.register_channels([ch(1011000001), ch(2010000001)]);
    for gain in Gain::ALL {
        store.insert(&run, ch(1011000001), StatisticKey::test_pulse(gain, Moment::Mean), 1000.0);
    }
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let result = rc.classify(&run).unwrap();

    let expected: Vec<Diagnostic> = Gain::ALL
        .into_iter()
        .map(|gain| Diagnostic::NoPopulation {
            run_type: RunType::TestPulse,
            subdetector: Subdetector::Endcap,
            gain: Some(gain),
        })
        .collect();
    assert_eq!(result.diagnostics, expected);
    assert!(rc.flags_for_channel(&run, ch(1011000001)).unwrap().is_empty());
}

#[test]
fn test_laser_average_ignores_dead_channels() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    let channels = [(1011000001, -5.0, 0.0), (1011000002, 1000.0, 10.0), (1011000003, 1000.0, 10.0), (1011000004, 50.0, 1.0)];
    for (raw, mean, rms) in channels {
        store.insert(&run, ch(raw), StatisticKey::laser(Moment::Mean), mean);
        store.insert(&run, ch(raw), StatisticKey::laser(Moment::Rms), rms);
    }
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let result = rc.classify(&run).unwrap();

    // Endcap has no laser data in this run
    assert_eq!(
        result.diagnostics,
        vec![Diagnostic::NoPopulation {
            run_type: RunType::Laser,
            subdetector: Subdetector::Endcap,
            gain: None,
        }]
    );
    assert_eq!(rc.flags_for_channel(&run, ch(1011000001)).unwrap(), set(&[Flag::DeadLaser]));
    // Average of positive means is 683.3; 50 is below a tenth of it
    assert_eq!(rc.flags_for_channel(&run, ch(1011000004)).unwrap(), set(&[Flag::LowLaser]));
    assert!(rc.flags_for_channel(&run, ch(1011000002)).unwrap().is_empty());
}

#[test]
fn test_laser_undefined_average_reports_diagnostic() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    store.insert(&run, ch(2010000001), StatisticKey::laser(Moment::Mean), 0.0);
    store.insert(&run, ch(2010000002), StatisticKey::laser(Moment::Mean), -1.0);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let result = rc.classify(&run).unwrap();

    assert_eq!(
        result.diagnostics,
        vec![
            Diagnostic::NoPopulation {
                run_type: RunType::Laser,
                subdetector: Subdetector::Barrel,
                gain: None,
            },
            Diagnostic::NoPopulation {
                run_type: RunType::Laser,
                subdetector: Subdetector::Endcap,
                gain: None,
            },
        ]
    );
    // Dead flags do not need the average
    assert_eq!(rc.channels_with_flag(&run, &[FlagPattern::exact(Flag::DeadLaser)], CombineOp::And, None).unwrap().len(), 2);
}

// ============================================================================
// HV off
// ============================================================================

fn hv_run(mean: f64, rms_on: f64, rms_off: f64) -> (RunId, MemoryMeasurementStore) {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &run, ch(1011000001), Gain::G12, mean, rms_on);
    store.insert(&run, ch(1011000001), StatisticKey::pedestal_off(Gain::G12, Moment::Mean), mean);
    store.insert(&run, ch(1011000001), StatisticKey::pedestal_off(Gain::G12, Moment::Rms), rms_off);
    (run, store)
}

#[test]
fn test_bad_voltage_flagged() {
    let (run, store) = hv_run(200.0, 1.5, 1.45);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();
    assert_eq!(
        rc.flags_for_channel(&run, ch(1011000001)).unwrap(),
        set(&[Flag::BadVoltage(Gain::G12)])
    );
}

#[test]
fn test_bad_voltage_suppressed_by_committed_pedestal_flag() {
    // RMS 0.45 is below the G12 dead floor; the committed DPG12 blocks BVG12
    let (run, store) = hv_run(200.0, 0.45, 0.4);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();
    assert_eq!(
        rc.flags_for_channel(&run, ch(1011000001)).unwrap(),
        set(&[Flag::DeadPedestal(Gain::G12)])
    );
}

// ============================================================================
// State machine
// ============================================================================

#[test]
fn test_classify_is_idempotent() {
    let (run, store) = hv_run(200.0, 1.5, 1.45);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let first = rc.classify(&run).unwrap();
    let second = rc.classify(&run).unwrap();

    assert!(first.newly_classified);
    assert!(!second.newly_classified);
    assert!(second.reports.is_empty());
    assert_eq!(first.flag_count, second.flag_count);
    assert_eq!(first.fully_classified, second.fully_classified);
}

#[test]
fn test_classified_run_ignores_new_data_until_reset() {
    let (run, store) = hv_run(200.0, 1.5, 1.45);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();

    insert_pedestal(rc.measurements_mut(), &run, ch(1011000001), Gain::G12, 200.0, 0.1);
    rc.classify(&run).unwrap();
    assert_eq!(
        rc.flags_for_channel(&run, ch(1011000001)).unwrap(),
        set(&[Flag::BadVoltage(Gain::G12)])
    );

    rc.reset(&run).unwrap();
    assert!(!rc.is_classified(&run).unwrap());
    assert!(rc.flags(&run).unwrap().is_empty());

    rc.classify(&run).unwrap();
    assert_eq!(
        rc.flags_for_channel(&run, ch(1011000001)).unwrap(),
        set(&[Flag::DeadPedestal(Gain::G12)])
    );
}

#[test]
fn test_interrupted_run_is_restarted() {
    let (run, store) = hv_run(200.0, 1.5, 1.45);
    let mut flags = MemoryFlagStore::new();
    flags
        .commit_flags(&run, &[(ch(1011000001), Flag::DeadLaser)])
        .unwrap();
    flags
        .set_state(
            &run,
            RunState {
                state: ClassificationState::Classifying,
                fully_classified: false,
                fingerprint: None,
            },
        )
        .unwrap();

    let mut rc = RunClassifier::new(store, flags);
    let result = rc.classify(&run).unwrap();
    assert!(result.newly_classified);
    assert!(!rc
        .flags_for_channel(&run, ch(1011000001))
        .unwrap()
        .contains(&Flag::DeadLaser));
}

// ============================================================================
// Failure handling
// ============================================================================

/// Flag store whose n-th flag commit fails
struct FailingCommits {
    inner: MemoryFlagStore,
    commits: usize,
    fail_on: usize,
}

impl FlagStore for FailingCommits {
    fn state(&self, run: &RunId) -> StoreResult<RunState> {
        self.inner.state(run)
    }

    fn set_state(&mut self, run: &RunId, state: RunState) -> StoreResult<()> {
        self.inner.set_state(run, state)
    }

    fn commit_flags(&mut self, run: &RunId, flags: &[(ChannelId, Flag)]) -> StoreResult<()> {
        self.commits += 1;
        if self.commits == self.fail_on {
            return Err(StoreError::Write("constraint violation".to_string()));
        }
        self.inner.commit_flags(run, flags)
    }

    fn commit_missing(&mut self, run: &RunId, channels: &BTreeSet<ChannelId>) -> StoreResult<()> {
        self.inner.commit_missing(run, channels)
    }

    fn flags(&self, run: &RunId) -> StoreResult<BTreeMap<ChannelId, FlagSet>> {
        self.inner.flags(run)
    }

    fn missing_channels(&self, run: &RunId) -> StoreResult<BTreeSet<ChannelId>> {
        self.inner.missing_channels(run)
    }

    fn clear(&mut self, run: &RunId) -> StoreResult<()> {
        self.inner.clear(run)
    }
}

fn full_run() -> (RunId, MemoryMeasurementStore) {
    let run = RunId::from("ghc7");
    let channel = ch(1011000001);
    let mut store = MemoryMeasurementStore::new();
    for gain in Gain::ALL {
        insert_pedestal(&mut store, &run, channel, gain, 0.5, 0.1);
        store.insert(&run, channel, StatisticKey::pedestal_off(gain, Moment::Mean), 0.5);
        store.insert(&run, channel, StatisticKey::pedestal_off(gain, Moment::Rms), 0.1);
        store.insert(&run, channel, StatisticKey::test_pulse(gain, Moment::Mean), 0.0);
        store.insert(&run, channel, StatisticKey::test_pulse(gain, Moment::Rms), 0.0);
    }
    store.insert(&run, channel, StatisticKey::laser(Moment::Mean), 0.0);
    store.insert(&run, channel, StatisticKey::laser(Moment::Rms), 0.0);
    (run, store)
}

#[test]
fn test_full_run_is_fully_classified() {
    let (run, store) = full_run();
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let result = rc.classify(&run).unwrap();

    assert!(result.fully_classified);
    assert!(result.reports.iter().all(|r| r.outcome.is_completed()));
    // 3 DP + 3 DTP + DLAMPL
    assert_eq!(result.flag_count, 7);
}

#[test]
fn test_write_failure_rolls_back_only_its_sub_pass() {
    let (run, store) = full_run();
    let flags = FailingCommits {
        inner: MemoryFlagStore::new(),
        commits: 0,
        fail_on: 2, // test pulse
    };
    let mut rc = RunClassifier::new(store, flags);
    let result = rc.classify(&run).unwrap();

    assert!(!result.fully_classified);
    assert!(rc.is_classified(&run).unwrap());
    let outcome = &result.reports.iter().find(|r| r.pass == SubPass::TestPulse).unwrap().outcome;
    assert!(matches!(outcome, SubPassOutcome::Failed { reason } if reason.contains("constraint violation")));

    let flags = rc.flags_for_channel(&run, ch(1011000001)).unwrap();
    assert!(flags.contains(&Flag::DeadPedestal(Gain::G1)));
    assert!(flags.contains(&Flag::DeadLaser));
    assert!(!flags.iter().any(|f| f.kind() == FlagKind::DeadTestPulse));
}

/// Measurement store that loses its connection when laser data is read
struct LosesConnection {
    inner: MemoryMeasurementStore,
    armed: Cell<bool>,
}

impl MeasurementStore for LosesConnection {
    fn statistic(&self, run: &RunId, channel: ChannelId, key: StatisticKey) -> StoreResult<Option<f64>> {
        self.inner.statistic(run, channel, key)
    }

    fn values(&self, run: &RunId, key: StatisticKey) -> StoreResult<BTreeMap<ChannelId, f64>> {
        if self.armed.get() && key.run_type() == RunType::Laser {
            return Err(StoreError::Unavailable("server closed the connection".to_string()));
        }
        self.inner.values(run, key)
    }

    fn all_channel_ids(&self, subdetector: Option<Subdetector>) -> StoreResult<BTreeSet<ChannelId>> {
        self.inner.all_channel_ids(subdetector)
    }

    fn fingerprint(&self, run: &RunId) -> StoreResult<u64> {
        self.inner.fingerprint(run)
    }
}

#[test]
fn test_connectivity_loss_aborts_and_clears() {
    let (run, store) = full_run();
    let measurements = LosesConnection {
        inner: store,
        armed: Cell::new(true),
    };
    let mut rc = RunClassifier::new(measurements, MemoryFlagStore::new());

    let err = rc.classify(&run).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, GhcError::Store(StoreError::Unavailable(_))));

    // Pedestal flags committed before the failure are gone
    assert_eq!(rc.state(&run).unwrap().state, ClassificationState::Unclassified);
    assert!(rc.flags(&run).unwrap().is_empty());

    // Connection back: a new attempt classifies normally
    rc.measurements().armed.set(false);
    let result = rc.classify(&run).unwrap();
    assert!(result.fully_classified);
}

// ============================================================================
// Missing and masked channels
// ============================================================================

#[test]
fn test_missing_channels_from_test_pulse_gains() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    for gain in Gain::ALL {
        store.insert(&run, ch(1011000001), StatisticKey::test_pulse(gain, Moment::Mean), 1000.0);
        store.insert(&run, ch(1011000001), StatisticKey::test_pulse(gain, Moment::Rms), 5.0);
    }
    store.insert(&run, ch(1011000002), StatisticKey::test_pulse(Gain::G6, Moment::Mean), 1000.0);
    store.insert(&run, ch(1011000002), StatisticKey::test_pulse(Gain::G6, Moment::Rms), 5.0);

    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let result = rc.classify(&run).unwrap();
    assert_eq!(result.missing_count, 1);
    assert_eq!(rc.missing_channels(&run).unwrap(), BTreeSet::from([ch(1011000002)]));
    // Missing channels are not flags
    assert!(rc.flags_for_channel(&run, ch(1011000002)).unwrap().is_empty());
}

#[test]
fn test_masked_channels_hidden_from_queries() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &run, ch(1011000001), Gain::G1, 0.5, 0.1);
    insert_pedestal(&mut store, &run, ch(1011000002), Gain::G1, 0.5, 0.1);

    let mut config = GhcConfig::default();
    config.masked_channels.insert(ch(1011000002));
    let mut rc = RunClassifier::with_config(store.clone(), MemoryFlagStore::new(), config.clone());
    rc.classify(&run).unwrap();

    assert_eq!(rc.problematic_channels(&run, false).unwrap(), BTreeSet::from([ch(1011000001)]));
    assert!(rc.flags_for_channel(&run, ch(1011000002)).unwrap().is_empty());
    assert!(!rc.active_channels(&run, &[], None).unwrap().contains(&ch(1011000002)));
    // Classification itself is unaffected
    assert_eq!(rc.flag_store().flags(&run).unwrap().len(), 2);

    config.keep_masked = true;
    let mut kept = RunClassifier::with_config(store, MemoryFlagStore::new(), config);
    kept.classify(&run).unwrap();
    assert_eq!(kept.problematic_channels(&run, false).unwrap().len(), 2);
}

#[test]
fn test_channels_with_flag_combinations() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &run, ch(1011000001), Gain::G12, 235.0, 2.5); // LR + BP
    insert_pedestal(&mut store, &run, ch(1011000002), Gain::G12, 200.0, 2.5); // LR
    insert_pedestal(&mut store, &run, ch(2010000001), Gain::G12, 235.0, 1.0); // BP
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&run).unwrap();

    let lr = FlagPattern::exact(Flag::LargeRms(Gain::G12));
    let bp: FlagPattern = "BP%".parse().unwrap();
    assert_eq!(
        rc.channels_with_flag(&run, &[lr, bp], CombineOp::And, None).unwrap(),
        BTreeSet::from([ch(1011000001)])
    );
    assert_eq!(rc.channels_with_flag(&run, &[lr, bp], CombineOp::Or, None).unwrap().len(), 3);
    assert_eq!(
        rc.channels_with_flag(&run, &[bp], CombineOp::Or, Some(Subdetector::Endcap)).unwrap(),
        BTreeSet::from([ch(2010000001)])
    );
}

#[test]
fn test_active_and_inactive_channels() {
    let run = RunId::from("ghc1");
    let mut store = MemoryMeasurementStore::new();
    store.register_channels([ch(1011000001), ch(1011000002), ch(2010000001)]);
    insert_pedestal(&mut store, &run, ch(1011000001), Gain::G6, 200.0, 1.0);
    let rc = RunClassifier::new(store, MemoryFlagStore::new());

    let g6 = [StatisticPattern::run_type(RunType::PedestalHvOn).with_gain(Gain::G6).with_moment(Moment::Mean)];
    assert_eq!(rc.active_channels(&run, &g6, None).unwrap(), BTreeSet::from([ch(1011000001)]));
    assert_eq!(
        rc.inactive_channels(&run, &g6, Some(Subdetector::Barrel)).unwrap(),
        BTreeSet::from([ch(1011000002)])
    );
    assert_eq!(rc.inactive_channels(&run, &g6, None).unwrap().len(), 2);
}

// ============================================================================
// Run comparison
// ============================================================================

#[test]
fn test_run_diff_between_runs() {
    let r1 = RunId::from("ghc1");
    let r2 = RunId::from("ghc2");
    let channel = ch(10001);
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &r1, channel, Gain::G1, 0.5, 0.1);
    insert_pedestal(&mut store, &r2, channel, Gain::G1, 200.0, 1.5);
    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&r1).unwrap();
    rc.classify(&r2).unwrap();

    let d = rc.diff(&r2, &r1).unwrap();
    let cd = &d.channels[&channel];
    assert_eq!(cd.added, set(&[Flag::LargeRms(Gain::G1)]));
    assert_eq!(cd.removed, set(&[Flag::DeadPedestal(Gain::G1)]));
    assert!(cd.common.is_empty());
    assert!(cd.changed());

    // A run compared with itself changes nothing
    let same = rc.diff(&r2, &r2).unwrap();
    assert_eq!(same.changed_channels().count(), 0);
    assert_eq!(same.summary().added, 0);
}

#[test]
fn test_chronological_statistics() {
    let runs: Vec<RunId> = ["ghc10", "ghc9"].iter().map(|s| RunId::from(*s)).collect();
    let mut store = MemoryMeasurementStore::new();
    insert_pedestal(&mut store, &runs[1], ch(1011000001), Gain::G12, 200.0, 2.5);
    insert_pedestal(&mut store, &runs[1], ch(1011000002), Gain::G12, 200.0, 1.0);
    insert_pedestal(&mut store, &runs[0], ch(1011000001), Gain::G12, 200.0, 1.0);
    insert_pedestal(&mut store, &runs[0], ch(1011000002), Gain::G12, 200.0, 2.5);

    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let mut ordered = runs.clone();
    ordered.sort();
    for run in &ordered {
        rc.classify(run).unwrap();
    }
    assert_eq!(ordered[0].as_str(), "ghc9");

    let stats = RunStatistics::chronological(&rc, &ordered).unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].get("Noisy channels in G12"), Some(&StatValue::Count(1)));
    assert_eq!(
        stats[1].get("Noisy channels in G12").map(|v| v.to_string()),
        Some("1^{+1}_{-1}".to_string())
    );
    assert_eq!(
        stats[1].get("Active channels Pedestals (HV ON) G12").and_then(StatValue::total),
        Some(2)
    );

    let table = render_run_table(&stats);
    assert!(table.contains("ghc9"));
    assert!(table.contains("Channels within design performance in G12"));

    let flag_stats = FlagStatistics::chronological(&rc, &ordered).unwrap();
    let (_, cells) = flag_stats[1]
        .rows
        .iter()
        .find(|(f, _)| *f == Flag::LargeRms(Gain::G12))
        .unwrap();
    assert_eq!(cells[0].to_string(), "1^{+1}_{-1}");
    assert_eq!(cells[1].to_string(), "0^{+0}_{-0}");
}

#[test]
fn test_comparison_table_from_classified_runs() {
    let runs: Vec<RunId> = ["ghc1", "ghc2"].iter().map(|s| RunId::from(*s)).collect();
    let mut store = MemoryMeasurementStore::new();
    // Fixed between runs
    insert_pedestal(&mut store, &runs[0], ch(1011000001), Gain::G1, 0.5, 0.1);
    insert_pedestal(&mut store, &runs[1], ch(1011000001), Gain::G1, 200.0, 0.5);
    // Unchanged
    insert_pedestal(&mut store, &runs[0], ch(1011000002), Gain::G1, 240.0, 0.5);
    insert_pedestal(&mut store, &runs[1], ch(1011000002), Gain::G1, 240.0, 0.5);

    // Healthy higher gains, so no channel is a missing channel
    for run in &runs {
        for raw in [1011000001, 1011000002] {
            insert_pedestal(&mut store, run, ch(raw), Gain::G6, 200.0, 1.0);
            insert_pedestal(&mut store, run, ch(raw), Gain::G12, 200.0, 1.5);
        }
    }

    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    let mut columns = Vec::new();
    for run in &runs {
        rc.classify(run).unwrap();
        columns.push((run.clone(), rc.run_flags(run).unwrap()));
    }

    let table = ComparisonTable::build(&columns);
    let changed: Vec<ChannelId> = table.rows(RowFilter::Changed).map(|(c, _)| *c).collect();
    let unchanged: Vec<ChannelId> = table.rows(RowFilter::Unchanged).map(|(c, _)| *c).collect();
    assert_eq!(changed, vec![ch(1011000001)]);
    assert_eq!(unchanged, vec![ch(1011000002)]);

    let cells = &table.rows[&ch(1011000001)];
    assert_eq!(cells[0].to_string(), "DPG1");
    assert_eq!(cells[1].to_string(), "OK: -DPG1");
    assert!(table.render(RowFilter::All).contains("OK: -DPG1"));
}
