//! Indexer wiring: external adapters, startup checkpoint load and the
//! coordinator loop.

use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};
use zeta_trade_indexer::{
    alert::{Alerter, LogAlerter, TelegramAlerter},
    checkpoint::{CheckpointStore, FileCheckpointStore},
    coordinator::{Coordinator, CycleOutcome},
    resolver::RpcOwnerResolver,
    retry::Backoff,
    rpc::RpcClient,
    sink::{StreamSink, TableSink},
};

use crate::{
    config::{CliConfig, ConfigError, EnvConfig, parse_markets},
    error::{Error, Result},
};

pub struct Indexer {
    coordinator: Arc<Coordinator>,
    poll_interval: Duration,
    once: bool,
}

impl Indexer {
    pub async fn try_new(env: EnvConfig, cli: CliConfig) -> Result<Self> {
        let bytes = tokio::fs::read(&cli.markets)
            .await
            .map_err(ConfigError::MarketsFile)?;
        let markets = parse_markets(&bytes)?;
        let program_id = env.program_id()?;
        let dry_run = cli.dry_run || env.debug;
        let timeouts = env.timeouts();

        let rpc = RpcClient::new(env.rpc_url()?, env.commitment, timeouts.fetch)?;
        let resolver = Arc::new(RpcOwnerResolver::new(rpc.clone()));

        let alerter: Arc<dyn Alerter> = match env.telegram() {
            Some((token, chat_id)) => Arc::new(TelegramAlerter::new(token, chat_id, env.network)?),
            None => {
                warn!("telegram is not configured, alerts are only logged");
                Arc::new(LogAlerter)
            }
        };

        let store = Arc::new(FileCheckpointStore::new(&env.data_dir));
        let checkpoints = Backoff::default()
            .retry("checkpoint load", |_| store.load())
            .await?;
        info!(
            path = %store.path().display(),
            markets = checkpoints.len(),
            "checkpoints loaded"
        );

        let trades_dir = env.data_dir.join("trades");
        let (price_converter, size_converter) = env.converters();
        let mut builder = Coordinator::builder(program_id, Arc::new(rpc), resolver)
            .with_markets(markets)
            .with_checkpoints(checkpoints)
            .with_checkpoint_store(store)
            .with_alerter(alerter)
            .with_timeouts(timeouts)
            .with_converters(price_converter, size_converter)
            .dry_run(dry_run);
        if dry_run {
            warn!("dry run, results and checkpoints will not be written out");
        } else {
            builder = builder
                .with_sink(Arc::new(TableSink::open(trades_dir.join("table.json")).await?))
                .with_sink(Arc::new(StreamSink::new(trades_dir.join("stream.ndjson"))));
        }

        Ok(Self {
            coordinator: Arc::new(builder.build()),
            poll_interval: env.poll_interval(),
            once: cli.once,
        })
    }

    pub async fn run(self) -> Result<()> {
        if !self.once {
            self.coordinator
                .run(self.poll_interval, shutdown_signal())
                .await;
            return Ok(());
        }

        let outcomes = self.coordinator.poll_all().await;
        self.coordinator.shutdown().await;

        let failed = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .count();
        for (market, outcome) in &outcomes {
            match outcome {
                CycleOutcome::Delivered {
                    trades,
                    first_seq,
                    last_seq,
                } => info!(%market, trades, first_seq, last_seq, "pass complete"),
                other => info!(%market, outcome = ?other, "pass complete"),
            }
        }

        if failed > 0 {
            return Err(Error::FailedCycles(failed));
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(err) => {
            error!(%err, "failed to listen for interrupt");
            std::future::pending::<()>().await
        }
    }
}
