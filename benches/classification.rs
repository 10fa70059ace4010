//! Benchmarks for run classification and run comparison

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ecal_ghc::{
    ChannelClassifier, ChannelId, ChannelStatistics, Gain, MemoryFlagStore,
    MemoryMeasurementStore, Moment, PopulationAverages, RunClassifier, RunId, RunType,
    StatisticKey, Subdetector,
};

/// Full-detector population with every run type and a sprinkling of defects
fn generate_run(store: &mut MemoryMeasurementStore, run: &RunId, channels: u32) {
    for i in 0..channels {
        let raw = if i % 5 == 0 { 2010000000 + i } else { 1011000000 + i };
        let ch = ChannelId::new(raw).unwrap();
        let wobble = (i as f64 * 0.37).sin();
        for gain in Gain::ALL {
            let mean = if i % 97 == 0 { 0.5 } else { 200.0 + 20.0 * wobble };
            let rms = 1.0 + 0.8 * wobble.abs() + if i % 53 == 0 { 5.0 } else { 0.0 };
            store.insert(run, ch, StatisticKey::pedestal_on(gain, Moment::Mean), mean);
            store.insert(run, ch, StatisticKey::pedestal_on(gain, Moment::Rms), rms);
            store.insert(run, ch, StatisticKey::pedestal_off(gain, Moment::Mean), mean);
            let off = if i % 41 == 0 { rms } else { rms * 0.6 };
            store.insert(run, ch, StatisticKey::pedestal_off(gain, Moment::Rms), off);
            let amplitude = if i % 89 == 0 { 0.0 } else { 1000.0 + 300.0 * wobble };
            store.insert(run, ch, StatisticKey::test_pulse(gain, Moment::Mean), amplitude);
            store.insert(run, ch, StatisticKey::test_pulse(gain, Moment::Rms), 5.0);
        }
        store.insert(run, ch, StatisticKey::laser(Moment::Mean), 1000.0 + 100.0 * wobble);
        store.insert(run, ch, StatisticKey::laser(Moment::Rms), 20.0);
    }
}

fn bench_single_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel");

    let classifier = ChannelClassifier::new();
    let mut averages = PopulationAverages::new();
    for gain in Gain::ALL {
        averages.set(RunType::TestPulse, Subdetector::Barrel, Some(gain), 1000.0);
    }
    averages.set(RunType::Laser, Subdetector::Barrel, None, 1000.0);

    let mut stats = ChannelStatistics::new();
    for gain in Gain::ALL {
        stats.insert(StatisticKey::pedestal_on(gain, Moment::Mean), 201.0);
        stats.insert(StatisticKey::pedestal_on(gain, Moment::Rms), 1.2);
        stats.insert(StatisticKey::pedestal_off(gain, Moment::Rms), 1.1);
        stats.insert(StatisticKey::test_pulse(gain, Moment::Mean), 950.0);
    }
    stats.insert(StatisticKey::laser(Moment::Mean), 980.0);
    stats.insert(StatisticKey::laser(Moment::Rms), 15.0);
    let ch = ChannelId::new(1011000001).unwrap();

    group.bench_function("classify_all_rules", |b| {
        b.iter(|| black_box(classifier.classify(black_box(ch), &stats, &averages)))
    });

    group.finish();
}

fn bench_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    group.sample_size(10);

    for channels in [1_000u32, 10_000, 75_848] {
        let run = RunId::from("ghc1");
        let mut store = MemoryMeasurementStore::new();
        generate_run(&mut store, &run, channels);

        group.throughput(Throughput::Elements(channels as u64));
        group.bench_with_input(BenchmarkId::new("classify", channels), &store, |b, store| {
            b.iter(|| {
                let mut rc = RunClassifier::new(store.clone(), MemoryFlagStore::new());
                black_box(rc.classify(&run).unwrap())
            })
        });
    }

    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");

    let first = RunId::from("ghc1");
    let second = RunId::from("ghc2");
    let mut store = MemoryMeasurementStore::new();
    generate_run(&mut store, &first, 10_000);
    generate_run(&mut store, &second, 10_000);
    // Second run: same population with a different defect pattern
    for i in (0..10_000u32).step_by(31) {
        let raw = if i % 5 == 0 { 2010000000 + i } else { 1011000000 + i };
        let ch = ChannelId::new(raw).unwrap();
        store.insert(&second, ch, StatisticKey::pedestal_on(Gain::G12, Moment::Rms), 3.0);
        store.insert(&second, ch, StatisticKey::pedestal_on(Gain::G12, Moment::Mean), 200.0);
    }

    let mut rc = RunClassifier::new(store, MemoryFlagStore::new());
    rc.classify(&first).unwrap();
    rc.classify(&second).unwrap();

    group.bench_function("run_diff_10000", |b| {
        b.iter(|| black_box(rc.diff(&second, &first).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_single_channel, bench_run, bench_diff);
criterion_main!(benches);
