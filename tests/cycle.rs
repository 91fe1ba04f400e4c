use std::{sync::Arc, time::Duration};

use zeta_trade_indexer::{
    alert::Alert,
    checkpoint::{CheckpointStore, Checkpoints},
    coordinator::{Coordinator, CoordinatorBuilder, CycleOutcome, MarketPhase, Timeouts},
    error::{IngestError, Operation},
    retry::Backoff,
    testing::{
        self, EventQueueBuilder, GatedAccountSource, MapOwnerResolver, MemoryCheckpointStore,
        MemorySink, RecordingAlerter, StaticAccountSource,
    },
    types::{MarketContext, Pubkey},
};

const PROGRAM_ID: Pubkey = Pubkey::new([9; 32]);
const HANDLE: Pubkey = Pubkey::new([1; 32]);
const OWNER: Pubkey = Pubkey::new([2; 32]);

struct Env {
    source: Arc<StaticAccountSource>,
    resolver: Arc<MapOwnerResolver>,
    sink: Arc<MemorySink>,
    alerter: Arc<RecordingAlerter>,
    market: MarketContext,
}

impl Env {
    fn new(max_batch: usize) -> Self {
        let resolver = MapOwnerResolver::new();
        resolver.insert(HANDLE, OWNER);
        Self {
            source: Arc::new(StaticAccountSource::new()),
            resolver: Arc::new(resolver),
            sink: Arc::new(MemorySink::new("memory", max_batch)),
            alerter: Arc::new(RecordingAlerter::new()),
            market: testing::market("SOL", 137),
        }
    }

    fn builder(&self) -> CoordinatorBuilder {
        Coordinator::builder(PROGRAM_ID, self.source.clone(), self.resolver.clone())
            .with_markets([self.market.clone()])
            .with_sink(self.sink.clone())
            .with_alerter(self.alerter.clone())
    }

    fn publish(&self, queue: &EventQueueBuilder) {
        self.source.set(self.market.event_queue, queue.build());
    }
}

fn fills(queue: &mut EventQueueBuilder, n: usize) {
    for _ in 0..n {
        queue.push(testing::fill(HANDLE, true, false, 1_000_000, 10));
    }
}

fn checkpoint_at(market: &MarketContext, seq_num: u64) -> Checkpoints {
    let mut checkpoints = Checkpoints::new();
    checkpoints.set(market.key(), seq_num);
    checkpoints
}

#[tokio::test]
async fn test_delivers_new_trades_once() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    queue.push(testing::fill(HANDLE, true, false, 1_000_000, 10));
    queue.push(testing::fill(HANDLE, false, true, 10, 1_000_000));
    queue.push(testing::cancel(HANDLE));
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 1,
            last_seq: 2
        }
    ));
    // The trailing cancel is read too, the checkpoint moves past it.
    assert_eq!(coordinator.checkpoint(&key), Some(3));
    assert_eq!(env.sink.len(), 2);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(outcome, CycleOutcome::NoNewEvents { seq_num: 3 }));
    assert_eq!(coordinator.checkpoint(&key), Some(3));
    assert_eq!(env.sink.received(), 2);

    queue.push(testing::fill(HANDLE, true, true, 2_000_000, 20));
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 1,
            first_seq: 4,
            last_seq: 4
        }
    ));

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(outcome, CycleOutcome::NoNewEvents { seq_num: 4 }));
    assert_eq!(env.sink.received(), 3);
    assert_eq!(
        env.sink.trades().iter().map(|t| t.seq_num).collect::<Vec<_>>(),
        vec![1, 2, 4]
    );
    assert!(env.alerter.alerts().is_empty());
}

#[tokio::test]
async fn test_checkpoint_is_last_delivered_seq() {
    let env = Env::new(10);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(64);
    fills(&mut queue, 30);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 30,
            first_seq: 1,
            last_seq: 30
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(30));
    assert_eq!(env.sink.batches(), vec![10, 10, 10]);

    let trades = env.sink.trades();
    assert_eq!(
        trades.iter().map(|t| t.seq_num).collect::<Vec<_>>(),
        (1..=30).collect::<Vec<_>>()
    );
    assert!(trades.iter().all(|t| t.owner == OWNER));
}

#[tokio::test]
async fn test_consumed_events_are_not_read() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    // Consumed records are outside of the live window even without a checkpoint.
    let mut queue = EventQueueBuilder::new(8);
    fills(&mut queue, 5);
    queue.consume(3);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 4,
            last_seq: 5
        }
    ));
}

#[tokio::test]
async fn test_stale_read_keeps_checkpoint() {
    let env = Env::new(25);
    let key = env.market.key();
    let coordinator = env
        .builder()
        .with_checkpoints(checkpoint_at(&env.market, 100))
        .build();

    let mut queue = EventQueueBuilder::new(16);
    queue.starting_at(85);
    fills(&mut queue, 5);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Stale {
            seq_num: 90,
            last_seq_num: 100
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(100));
    assert!(env.sink.is_empty());
    assert_eq!(env.resolver.calls(), 0);
    assert_eq!(
        env.alerter.alerts(),
        vec![Alert::StaleRead {
            market: key,
            seq_num: 90,
            last_seq_num: 100,
        }]
    );
}

#[tokio::test]
async fn test_gap_advances_checkpoint_without_trades() {
    let env = Env::new(25);
    let key = env.market.key();
    let coordinator = env
        .builder()
        .with_checkpoints(checkpoint_at(&env.market, 0))
        .build();

    let mut queue = EventQueueBuilder::new(5);
    fills(&mut queue, 10);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Gap {
            last_seq_num: 0,
            seq_num: 10
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(10));
    assert!(env.sink.is_empty());
    assert_eq!(
        env.alerter.alerts(),
        vec![Alert::GapDetected {
            market: key.clone(),
            last_seq_num: 0,
            seq_num: 10,
        }]
    );

    fills(&mut queue, 2);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 11,
            last_seq: 12
        }
    ));
}

#[tokio::test]
async fn test_partial_delivery_is_retried_whole() {
    let env = Env::new(10);
    env.sink.fail_chunks([1]);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(32);
    fills(&mut queue, 25);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(outcome, CycleOutcome::Failed(IngestError::Sink(_))));
    assert_eq!(coordinator.checkpoint(&key), None);
    assert_eq!(env.sink.len(), 15);
    assert!(matches!(
        env.alerter.alerts().as_slice(),
        [Alert::CycleFailed { kind: "sink_error", .. }]
    ));

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 25,
            first_seq: 1,
            last_seq: 25
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(25));
    assert_eq!(env.sink.batches(), vec![10, 10, 5, 10, 10, 5]);
    assert_eq!(env.sink.len(), 25);
    assert_eq!(env.sink.received(), 15 + 25);
    assert!(
        testing::trades("SOL", 137, 1..=25)
            .iter()
            .all(|trade| env.sink.contains(&trade.key()))
    );
}

#[tokio::test]
async fn test_non_fills_and_zero_quantity_are_skipped() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    queue.push(testing::cancel(HANDLE));
    queue.push(testing::cancel(HANDLE));
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::NoTrades {
            events: 2,
            non_fills: 2,
            invalid: 0
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(2));

    queue.push(testing::fill(HANDLE, true, false, 1_000_000, 10));
    queue.push(testing::fill(HANDLE, true, false, 0, 10));
    queue.push(testing::fill(HANDLE, false, true, 10, 1_000_000));
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 3,
            last_seq: 5
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(5));
    assert_eq!(env.resolver.calls(), 2);
    assert_eq!(
        env.sink.trades().iter().map(|t| t.seq_num).collect::<Vec<_>>(),
        vec![3, 5]
    );
}

#[tokio::test]
async fn test_cancels_do_not_hide_later_fills() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(4);
    fills(&mut queue, 1);
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered { last_seq: 1, .. }
    ));

    // Cancels fill the whole ring and overwrite the delivered fill.
    for _ in 0..4 {
        queue.push(testing::cancel(HANDLE));
    }
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::NoTrades {
            events: 4,
            non_fills: 4,
            invalid: 0
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(5));

    queue.push(testing::fill(HANDLE, true, false, 1_000_000, 10));
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered {
            trades: 1,
            first_seq: 6,
            last_seq: 6
        }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(6));
    assert_eq!(
        env.sink.trades().iter().map(|t| t.seq_num).collect::<Vec<_>>(),
        vec![1, 6]
    );
    assert!(env.alerter.alerts().is_empty());
}

#[tokio::test]
async fn test_consumed_trailing_cancel_is_not_a_gap() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(8);
    queue.push(testing::fill(HANDLE, true, false, 1_000_000, 10));
    queue.push(testing::cancel(HANDLE));
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered {
            trades: 1,
            first_seq: 1,
            last_seq: 1
        }
    ));

    queue.consume(2);
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::NoNewEvents { seq_num: 2 }
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(2));
    assert!(env.alerter.alerts().is_empty());
}

#[tokio::test]
async fn test_unresolved_owner_fails_closed() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 2);
    env.publish(&queue);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered { last_seq: 2, .. }
    ));

    env.resolver.remove(&HANDLE);
    fills(&mut queue, 2);
    env.publish(&queue);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed(IngestError::Resolution { handle: HANDLE, .. })
    ));
    assert_eq!(coordinator.checkpoint(&key), Some(2));
    assert_eq!(env.sink.len(), 2);

    env.resolver.insert(HANDLE, OWNER);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 3,
            last_seq: 4
        }
    ));
}

#[tokio::test]
async fn test_corrupt_account_fails_cycle() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let key = env.market.key();

    let mut data = EventQueueBuilder::new(4).build();
    data[0] = b'x';
    env.source.set(env.market.event_queue, data);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(outcome, CycleOutcome::Failed(IngestError::Decode(_))));
    assert_eq!(coordinator.phase(&key), Some(MarketPhase::Idle));
    assert_eq!(coordinator.checkpoint(&key), None);
}

#[tokio::test]
async fn test_in_flight_cycle_is_not_overlapped() {
    let env = Env::new(25);
    let source = Arc::new(GatedAccountSource::new());
    let coordinator = Arc::new(
        Coordinator::builder(PROGRAM_ID, source.clone(), env.resolver.clone())
            .with_markets([env.market.clone()])
            .with_sink(env.sink.clone())
            .build(),
    );
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 3);
    source.set(env.market.event_queue, queue.build());

    let first = tokio::spawn({
        let coordinator = coordinator.clone();
        let key = key.clone();
        async move { coordinator.run_cycle(&key).await }
    });
    source.entered().await;

    assert_eq!(coordinator.phase(&key), Some(MarketPhase::Fetching));
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Skipped
    ));

    source.release();
    let outcome = first.await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::Delivered { trades: 3, .. }
    ));
    assert_eq!(source.calls(), 1);
    assert_eq!(coordinator.phase(&key), Some(MarketPhase::Idle));
    assert_eq!(env.sink.received(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_releases_market() {
    let env = Env::new(25);
    let coordinator = env
        .builder()
        .with_timeouts(Timeouts {
            fetch: Duration::from_secs(1),
            ..Timeouts::default()
        })
        .build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 1);
    env.publish(&queue);
    env.source.set_hang(true);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed(IngestError::Timeout(Operation::Fetch))
    ));
    assert_eq!(coordinator.phase(&key), Some(MarketPhase::Idle));
    assert!(matches!(
        env.alerter.alerts().as_slice(),
        [Alert::CycleFailed { kind: "timeout_error", .. }]
    ));

    env.source.set_hang(false);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered { trades: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_delivery_timeout_keeps_checkpoint() {
    let env = Env::new(25);
    let coordinator = env
        .builder()
        .with_timeouts(Timeouts {
            deliver: Duration::from_secs(1),
            ..Timeouts::default()
        })
        .build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 2);
    env.publish(&queue);
    env.sink.set_hang(true);

    let outcome = coordinator.run_cycle(&key).await;
    assert!(matches!(outcome, CycleOutcome::Failed(IngestError::Sink(_))));
    assert_eq!(coordinator.checkpoint(&key), None);
    assert_eq!(coordinator.phase(&key), Some(MarketPhase::Idle));
}

#[tokio::test]
async fn test_markets_are_independent() {
    let env = Env::new(25);
    let broken = testing::market("BTC", 3);
    let coordinator = env.builder().with_markets([broken.clone()]).build();
    assert_eq!(coordinator.markets().count(), 2);

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 4);
    env.publish(&queue);

    let outcomes = coordinator.poll_all().await;
    assert_eq!(outcomes.len(), 2);
    for (market, outcome) in &outcomes {
        if *market == broken.key() {
            assert!(matches!(outcome, CycleOutcome::Failed(IngestError::Fetch(_))));
        } else {
            assert!(matches!(outcome, CycleOutcome::Delivered { trades: 4, .. }));
        }
    }
    assert_eq!(coordinator.checkpoint(&env.market.key()), Some(4));
    assert_eq!(coordinator.checkpoint(&broken.key()), None);
    assert!(matches!(
        env.alerter.alerts().as_slice(),
        [Alert::CycleFailed { market, kind: "fetch_error", .. }] if *market == broken.key()
    ));
}

#[tokio::test]
async fn test_fetch_failure_keeps_checkpoint() {
    let env = Env::new(25);
    let key = env.market.key();
    let coordinator = env
        .builder()
        .with_checkpoints(checkpoint_at(&env.market, 3))
        .build();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 5);
    env.publish(&queue);
    env.source.set_failing(true);

    assert!(coordinator.run_cycle(&key).await.is_failed());
    assert_eq!(coordinator.checkpoint(&key), Some(3));

    env.source.set_failing(false);
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered {
            trades: 2,
            first_seq: 4,
            last_seq: 5
        }
    ));
}

#[tokio::test]
async fn test_unknown_market() {
    let env = Env::new(25);
    let coordinator = env.builder().build();
    let unknown = testing::market("ETH", 1).key();

    assert!(matches!(
        coordinator.run_cycle(&unknown).await,
        CycleOutcome::UnknownMarket
    ));
    assert_eq!(coordinator.phase(&unknown), None);
    assert_eq!(env.source.calls(), 0);
}

#[tokio::test]
async fn test_dry_run_delivers_and_persists_nothing() {
    let env = Env::new(25);
    let store = Arc::new(MemoryCheckpointStore::new());
    let coordinator = env
        .builder()
        .with_checkpoint_store(store.clone())
        .dry_run(true)
        .build();
    let key = env.market.key();
    assert!(coordinator.is_dry_run());

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 3);
    env.publish(&queue);

    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::Delivered { trades: 3, .. }
    ));
    assert!(matches!(
        coordinator.run_cycle(&key).await,
        CycleOutcome::NoNewEvents { seq_num: 3 }
    ));
    coordinator.shutdown().await;

    assert!(env.sink.batches().is_empty());
    assert_eq!(coordinator.checkpoint(&key), Some(3));
    assert_eq!(store.attempts(), 0);
    assert!(store.saved().is_empty());
}

#[tokio::test]
async fn test_checkpoints_persisted_on_shutdown() {
    let env = Env::new(25);
    let store = Arc::new(MemoryCheckpointStore::new());
    let coordinator = env.builder().with_checkpoint_store(store.clone()).build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 3);
    env.publish(&queue);

    coordinator.run_cycle(&key).await;
    coordinator.shutdown().await;

    assert_eq!(store.saved().get(&key), Some(3));
    assert_eq!(store.saved(), coordinator.checkpoints());
}

#[tokio::test(start_paused = true)]
async fn test_failed_checkpoint_save_is_alerted() {
    let env = Env::new(25);
    let store = Arc::new(MemoryCheckpointStore::new());
    store.set_failing(true);
    let coordinator = env
        .builder()
        .with_checkpoint_store(store.clone())
        .with_backoff(Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(10),
            multiplier: 1,
            budget: 2,
        })
        .build();
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 1);
    env.publish(&queue);

    coordinator.run_cycle(&key).await;
    coordinator.shutdown().await;

    // Delivery is not undone, the in-memory checkpoint stays ahead of the store.
    assert_eq!(coordinator.checkpoint(&key), Some(1));
    assert!(store.saved().is_empty());
    assert!(store.attempts() >= 2);
    assert!(
        env.alerter
            .alerts()
            .iter()
            .any(|alert| matches!(alert, Alert::CheckpointFailed { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let env = Env::new(25);
    let store = Arc::new(MemoryCheckpointStore::new());
    let coordinator = Arc::new(env.builder().with_checkpoint_store(store.clone()).build());
    let key = env.market.key();

    let mut queue = EventQueueBuilder::new(16);
    fills(&mut queue, 3);
    env.publish(&queue);

    coordinator
        .clone()
        .run(
            Duration::from_millis(100),
            tokio::time::sleep(Duration::from_millis(350)),
        )
        .await;

    assert!(env.source.calls() >= 3);
    assert_eq!(env.sink.received(), 3);
    assert_eq!(store.saved().get(&key), Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_startup_load_is_retried() {
    let store = MemoryCheckpointStore::with_checkpoints(checkpoint_at(&testing::market("SOL", 137), 42));
    store.fail_loads(2);

    let backoff = Backoff {
        budget: 3,
        ..Backoff::default()
    };
    let checkpoints = tokio_test::assert_ok!(backoff.retry("checkpoint load", |_| store.load()).await);
    assert_eq!(checkpoints.get(&testing::market("SOL", 137).key()), Some(42));
}
