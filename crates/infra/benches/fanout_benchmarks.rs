use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::time::Duration;

use notifyhub_core::{Channel, NotificationEvent, NotificationId, NotificationStatus, Priority};
use notifyhub_events::{EventBus, HistoryBuffer};
use notifyhub_infra::{
    DeliveryChannels, NotificationConfig, NotificationSystem, PriorityRouter, SimulatedChannel,
    StatusCache,
};

fn sample_event(n: usize) -> NotificationEvent {
    NotificationEvent::new("BENCH", format!("event-{n}"), Priority::High)
}

fn bench_history_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_publish");
    group.throughput(Throughput::Elements(1));

    for subscribers in [0usize, 1, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let history = HistoryBuffer::new();
                let subs: Vec<_> = (0..subscribers).map(|_| history.subscribe()).collect();
                let mut n = 0usize;
                b.iter(|| {
                    n += 1;
                    history.publish(black_box(sample_event(n))).unwrap();
                    for sub in &subs {
                        black_box(sub.drain_ready());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_cache_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_round");
    group.throughput(Throughput::Elements(1));

    group.bench_function("admit_and_settle_high", |b| {
        let cache = StatusCache::new();
        let channels = PriorityRouter::select(Priority::High);
        let mut n = 0usize;
        b.iter(|| {
            n += 1;
            let id = NotificationId::from(format!("n-{}", n % 1_000));
            let round = cache.admit(id.clone(), sample_event(n), channels, |_| {});
            for &channel in channels {
                black_box(cache.record_outcome(&id, round, channel, &Ok(()), |_| {}));
            }
        });
    });

    group.bench_function("retry_scan_10k", |b| {
        let cache = StatusCache::new();
        for n in 0..10_000 {
            let id = NotificationId::from(format!("n-{n}"));
            let status = if n % 10 == 0 {
                NotificationStatus::Failed
            } else {
                NotificationStatus::Sent
            };
            cache.put(id, sample_event(n).with_status(status));
        }
        b.iter(|| {
            black_box(cache.values_where(|event| event.status == NotificationStatus::Failed))
        });
    });

    group.finish();
}

fn bench_publish_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_latency");
    group.sample_size(200);

    group.bench_function("instant_channels", |b| {
        let instant = |channel| Arc::new(SimulatedChannel::new(channel, Duration::ZERO, 0));
        let channels = DeliveryChannels::new(
            instant(Channel::Chat),
            instant(Channel::Email),
            instant(Channel::Phone),
        );
        let system = NotificationSystem::new(NotificationConfig::default(), channels).unwrap();
        let mut n = 0usize;
        b.iter(|| {
            n += 1;
            black_box(system.publish(NotificationEvent::new(
                "BENCH",
                format!("event-{n}"),
                Priority::parse(["LOW", "MEDIUM", "HIGH"][n % 3]),
            )))
        });
        system.shutdown();
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_history_publish,
    bench_cache_round,
    bench_publish_latency
);
criterion_main!(benches);
