//! Per-market fetch coordination.
//!
//! Every tracked market runs independent cycles of
//! fetch → decode → reconstruct → deliver → commit. At most one cycle per
//! market is in flight: a cycle started while the previous one still runs is
//! skipped, the next one catches up from the last committed checkpoint.
//!
//! The checkpoint of a market advances to the last record read only after
//! all trades among the records were accepted by every sink. Records without
//! trades advance it directly, a gap advances it past the lost records.

mod phase;

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    alert::{Alert, Alerter, LogAlerter},
    checkpoint::{CheckpointStore, CheckpointWriter, Checkpoints, WriterPolicy},
    error::{IngestError, Operation},
    fill::{self, TradeBuilder},
    num::Converter,
    queue::{self, QueueRead},
    resolver::OwnerResolver,
    retry::Backoff,
    sink::{SinkFanout, TradeSink},
    source::AccountSource,
    types::{MarketContext, MarketKey, Pubkey, SeqNum},
};

pub use phase::MarketPhase;
use phase::{PhaseGuard, PhaseLock};

/// Hard limits on external calls of a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub fetch: Duration,
    /// Applied per owner resolution.
    pub resolve: Duration,
    /// Applied per delivered chunk.
    pub deliver: Duration,
    /// Applied per checkpoint save attempt.
    pub checkpoint: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fetch: Duration::from_secs(10),
            resolve: Duration::from_secs(10),
            deliver: Duration::from_secs(10),
            checkpoint: Duration::from_secs(10),
        }
    }
}

/// Result of a single market cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Market is not tracked by the coordinator.
    UnknownMarket,

    /// Previous cycle of the market is still in flight.
    Skipped,

    /// Nothing appended since the checkpoint.
    NoNewEvents { seq_num: SeqNum },

    /// Queue read behind the checkpoint, checkpoint unchanged.
    Stale {
        seq_num: SeqNum,
        last_seq_num: SeqNum,
    },

    /// Records overwritten before being read, checkpoint advanced to `seq_num`.
    Gap {
        last_seq_num: SeqNum,
        seq_num: SeqNum,
    },

    /// New events without trades to deliver, checkpoint advanced past them.
    NoTrades {
        events: usize,
        non_fills: usize,
        invalid: usize,
    },

    /// Trades delivered and checkpoint advanced to the last event read,
    /// which may follow `last_seq`.
    Delivered {
        trades: usize,
        first_seq: SeqNum,
        last_seq: SeqNum,
    },

    /// Cycle failed, checkpoint unchanged.
    Failed(IngestError),
}

impl CycleOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, CycleOutcome::Failed(_))
    }
}

struct MarketSlot {
    context: MarketContext,
    lock: PhaseLock,
}

/// Drives ingestion cycles of all tracked markets.
pub struct Coordinator {
    markets: BTreeMap<MarketKey, MarketSlot>,
    program_id: Pubkey,
    source: Arc<dyn AccountSource>,
    resolver: Arc<dyn OwnerResolver>,
    sinks: SinkFanout,
    checkpoints: CheckpointWriter,
    alerter: Arc<dyn Alerter>,
    builder: TradeBuilder,
    timeouts: Timeouts,
    dry_run: bool,
}

impl Coordinator {
    pub fn builder(
        program_id: Pubkey,
        source: Arc<dyn AccountSource>,
        resolver: Arc<dyn OwnerResolver>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            program_id,
            source,
            resolver,
            markets: Vec::new(),
            sinks: Vec::new(),
            checkpoints: Checkpoints::new(),
            store: None,
            alerter: Arc::new(LogAlerter),
            timeouts: Timeouts::default(),
            backoff: Backoff::default(),
            price_converter: Converter::new(6),
            size_converter: Converter::new(3),
            dry_run: false,
        }
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketContext> {
        self.markets.values().map(|slot| &slot.context)
    }

    /// Last committed sequence number of the market.
    pub fn checkpoint(&self, market: &MarketKey) -> Option<SeqNum> {
        self.checkpoints.get(market)
    }

    pub fn checkpoints(&self) -> Checkpoints {
        self.checkpoints.snapshot()
    }

    /// Current cycle phase of the market, `None` if not tracked.
    pub fn phase(&self, market: &MarketKey) -> Option<MarketPhase> {
        self.markets.get(market).map(|slot| slot.lock.phase())
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs one cycle of the market unless one is already in flight.
    #[instrument(name = "cycle", skip_all, fields(market = %market))]
    pub async fn run_cycle(&self, market: &MarketKey) -> CycleOutcome {
        let Some(slot) = self.markets.get(market) else {
            warn!("market is not tracked");
            return CycleOutcome::UnknownMarket;
        };
        let Some(guard) = slot.lock.try_acquire() else {
            debug!(phase = ?slot.lock.phase(), "previous cycle in flight, skipped");
            return CycleOutcome::Skipped;
        };

        match self.cycle(&slot.context, &guard).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(kind = err.kind(), %err, "cycle failed");
                self.alerter.notify(Alert::CycleFailed {
                    market: market.clone(),
                    kind: err.kind(),
                    error: err.to_string(),
                });
                CycleOutcome::Failed(err)
            }
        }
    }

    async fn cycle(
        &self,
        market: &MarketContext,
        guard: &PhaseGuard<'_>,
    ) -> Result<CycleOutcome, IngestError> {
        let key = market.key();
        let last_seq_num = self.checkpoints.get(&key);

        let data = tokio::time::timeout(
            self.timeouts.fetch,
            self.source.account_bytes(&market.event_queue),
        )
        .await
        .map_err(|_| IngestError::Timeout(Operation::Fetch))??;

        guard.set(MarketPhase::Decoding);
        let (events, read_seq) = match queue::decode(&data, last_seq_num)? {
            QueueRead::Fresh { events, header } => {
                let Some(read_seq) = events.last().map(|event| event.seq_num) else {
                    debug!(seq_num = header.seq_num(), "no new events");
                    return Ok(CycleOutcome::NoNewEvents {
                        seq_num: header.seq_num(),
                    });
                };
                (events, read_seq)
            }
            QueueRead::Stale {
                header,
                last_seq_num,
            } => {
                guard.set(MarketPhase::Regressed);
                warn!(seq_num = header.seq_num(), last_seq_num, "stale read, checkpoint kept");
                self.alerter.notify(Alert::StaleRead {
                    market: key,
                    seq_num: header.seq_num(),
                    last_seq_num,
                });
                return Ok(CycleOutcome::Stale {
                    seq_num: header.seq_num(),
                    last_seq_num,
                });
            }
            QueueRead::Gap {
                header,
                last_seq_num,
            } => {
                guard.set(MarketPhase::GapSkipped);
                let seq_num = header.seq_num();
                warn!(
                    seq_num,
                    last_seq_num,
                    live = header.count(),
                    lost = seq_num - last_seq_num - header.count(),
                    "gap detected, overwritten events skipped"
                );
                self.checkpoints.commit(key.clone(), seq_num);
                self.alerter.notify(Alert::GapDetected {
                    market: key,
                    last_seq_num,
                    seq_num,
                });
                return Ok(CycleOutcome::Gap {
                    last_seq_num,
                    seq_num,
                });
            }
        };

        let batch = fill::reconstruct_batch(
            &self.builder,
            &events,
            market,
            &self.program_id,
            self.resolver.as_ref(),
            self.timeouts.resolve,
        )
        .await?;

        let Some((first_seq, last_seq)) = batch.seq_range() else {
            self.checkpoints.commit(key, read_seq);
            debug!(
                events = events.len(),
                non_fills = batch.non_fills,
                invalid = batch.invalid,
                read_seq,
                "no trades in new events"
            );
            return Ok(CycleOutcome::NoTrades {
                events: events.len(),
                non_fills: batch.non_fills,
                invalid: batch.invalid,
            });
        };

        guard.set(MarketPhase::Delivering);
        if self.dry_run {
            for trade in &batch.trades {
                info!(?trade, "dry run, trade not delivered");
            }
        } else {
            let report = self.sinks.deliver(&batch.trades).await?;
            debug!(chunks = report.chunks, "delivery acknowledged");
        }

        self.checkpoints.commit(key, read_seq);
        info!(
            trades = batch.len(),
            first_seq,
            last_seq,
            read_seq,
            non_fills = batch.non_fills,
            invalid = batch.invalid,
            "trades delivered"
        );

        Ok(CycleOutcome::Delivered {
            trades: batch.len(),
            first_seq,
            last_seq,
        })
    }

    /// Runs one concurrent pass over all markets.
    pub async fn poll_all(&self) -> Vec<(MarketKey, CycleOutcome)> {
        join_all(
            self.markets
                .keys()
                .map(|market| async move { (market.clone(), self.run_cycle(market).await) }),
        )
        .await
    }

    /// Starts cycles of every market each `period` until `shutdown` resolves,
    /// then waits for in-flight cycles and flushes checkpoints.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            markets = self.markets.len(),
            period_ms = period.as_millis() as u64,
            dry_run = self.dry_run,
            "coordinator started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    for market in self.markets.keys() {
                        let this = self.clone();
                        let market = market.clone();
                        cycles.spawn(async move {
                            this.run_cycle(&market).await;
                        });
                    }
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(err) = joined {
                        error!(%err, "cycle task failed");
                    }
                }
            }
        }

        info!(in_flight = cycles.len(), "shutting down, waiting for in-flight cycles");
        while let Some(joined) = cycles.join_next().await {
            if let Err(err) = joined {
                error!(%err, "cycle task failed");
            }
        }
        self.shutdown().await;
    }

    /// Flushes checkpoints not yet persisted and stops the checkpoint writer.
    pub async fn shutdown(&self) {
        self.checkpoints.shutdown().await;
    }
}

/// Builder of [`Coordinator`].
pub struct CoordinatorBuilder {
    program_id: Pubkey,
    source: Arc<dyn AccountSource>,
    resolver: Arc<dyn OwnerResolver>,
    markets: Vec<MarketContext>,
    sinks: Vec<Arc<dyn TradeSink>>,
    checkpoints: Checkpoints,
    store: Option<Arc<dyn CheckpointStore>>,
    alerter: Arc<dyn Alerter>,
    timeouts: Timeouts,
    backoff: Backoff,
    price_converter: Converter,
    size_converter: Converter,
    dry_run: bool,
}

impl CoordinatorBuilder {
    pub fn with_markets(mut self, markets: impl IntoIterator<Item = MarketContext>) -> Self {
        self.markets.extend(markets);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TradeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Checkpoints loaded at startup.
    pub fn with_checkpoints(mut self, checkpoints: Checkpoints) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Store committed checkpoints are persisted to. Without a store
    /// checkpoints are kept in memory only.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Retry policy of checkpoint saves.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_converters(mut self, price: Converter, size: Converter) -> Self {
        self.price_converter = price;
        self.size_converter = size;
        self
    }

    /// Reconstructs and logs trades without delivering them or persisting
    /// checkpoints.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builds the coordinator, spawning the checkpoint writer task.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Coordinator {
        let markets = self
            .markets
            .into_iter()
            .map(|context| {
                (
                    context.key(),
                    MarketSlot {
                        context,
                        lock: PhaseLock::default(),
                    },
                )
            })
            .collect();

        let sinks = self
            .sinks
            .into_iter()
            .fold(SinkFanout::new(self.timeouts.deliver), SinkFanout::with_sink);
        if sinks.is_empty() && !self.dry_run {
            warn!("no sinks configured, delivered trades are only acknowledged");
        }

        let checkpoints = match self.store {
            Some(store) if !self.dry_run => CheckpointWriter::spawn(
                self.checkpoints,
                store,
                self.alerter.clone(),
                WriterPolicy {
                    timeout: self.timeouts.checkpoint,
                    backoff: self.backoff,
                },
            ),
            _ => CheckpointWriter::detached(self.checkpoints),
        };

        Coordinator {
            markets,
            program_id: self.program_id,
            source: self.source,
            resolver: self.resolver,
            sinks,
            checkpoints,
            alerter: self.alerter,
            builder: TradeBuilder::new(self.price_converter, self.size_converter),
            timeouts: self.timeouts,
            dry_run: self.dry_run,
        }
    }
}
