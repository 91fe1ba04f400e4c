//! Batch reconstruction with owner resolution.

use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::warn;

use super::{
    reconstruct::TradeBuilder,
    types::{Reconstructed, SkipReason, TradeBatch},
};
use crate::{
    error::{IngestError, Operation},
    queue::SequencedEvent,
    resolver::OwnerResolver,
    types::{MarketContext, Pubkey},
};

/// Maximum number of owner resolutions in flight for a single batch.
const RESOLVE_CONCURRENCY: usize = 16;

/// Reconstructs trades from the events read in one cycle.
///
/// Non-fill and zero quantity events are skipped and counted before any owner
/// is resolved. A single failed or timed out resolution fails the whole batch,
/// so that no trade is ever delivered with an unknown owner.
pub async fn reconstruct_batch(
    builder: &TradeBuilder,
    events: &[SequencedEvent],
    market: &MarketContext,
    program_id: &Pubkey,
    resolver: &dyn OwnerResolver,
    resolve_timeout: Duration,
) -> Result<TradeBatch, IngestError> {
    let mut batch = TradeBatch::default();

    let mut fills = Vec::with_capacity(events.len());
    for event in events {
        match builder.skip_reason(&event.event) {
            None => fills.push(event),
            Some(SkipReason::NotFill) => batch.non_fills += 1,
            Some(SkipReason::ZeroQuantity) => {
                warn!(
                    seq_num = event.seq_num,
                    order_id = %event.event.order_id,
                    paid = %event.event.native_qty_paid,
                    released = %event.event.native_qty_released,
                    "fill with zero quantity skipped"
                );
                batch.invalid += 1;
            }
        }
    }
    if fills.is_empty() {
        return Ok(batch);
    }

    let handles: Vec<Pubkey> = fills.iter().map(|event| event.event.owner_handle).collect();
    let owners: Vec<Pubkey> = stream::iter(handles.into_iter().map(|handle| async move {
        resolve(resolver, program_id, &handle, resolve_timeout).await
    }))
    .buffered(RESOLVE_CONCURRENCY)
    .try_collect()
    .await?;

    let timestamp = chrono::Utc::now().timestamp();
    for (event, owner) in fills.into_iter().zip(owners) {
        match builder.reconstruct(event, owner, market, timestamp) {
            Reconstructed::Trade(trade) => batch.trades.push(trade),
            Reconstructed::Skip(SkipReason::NotFill) => batch.non_fills += 1,
            Reconstructed::Skip(SkipReason::ZeroQuantity) => batch.invalid += 1,
        }
    }
    batch.trades.sort_by_key(|trade| trade.seq_num);

    Ok(batch)
}

async fn resolve(
    resolver: &dyn OwnerResolver,
    program_id: &Pubkey,
    owner_handle: &Pubkey,
    timeout: Duration,
) -> Result<Pubkey, IngestError> {
    match tokio::time::timeout(timeout, resolver.resolve_owner(program_id, owner_handle)).await {
        Ok(Ok(owner)) => Ok(owner),
        Ok(Err(source)) => Err(IngestError::Resolution {
            handle: *owner_handle,
            source,
        }),
        Err(_) => Err(IngestError::Timeout(Operation::Resolve)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        num::Converter,
        queue::RawEvent,
        testing::{self, MapOwnerResolver, cancel, fill},
    };

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn builder() -> TradeBuilder {
        TradeBuilder::new(Converter::new(0), Converter::new(0))
    }

    fn sequenced(events: Vec<RawEvent>, first: u64) -> Vec<SequencedEvent> {
        events
            .into_iter()
            .zip(first..)
            .map(|(event, seq_num)| SequencedEvent { seq_num, event })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_filters_and_orders() {
        let handle_a = Pubkey::new([1; 32]);
        let handle_b = Pubkey::new([2; 32]);
        let resolver = MapOwnerResolver::new();
        resolver.insert(handle_a, Pubkey::new([11; 32]));
        resolver.insert(handle_b, Pubkey::new([12; 32]));

        let events = sequenced(
            vec![
                fill(handle_a, true, true, 1000, 10),
                cancel(handle_b),
                fill(handle_b, false, false, 10, 1000),
                fill(handle_a, true, false, 0, 10),
                fill(handle_b, true, false, 500, 5),
            ],
            21,
        );
        let market = testing::market("SOL", 137);
        let program_id = Pubkey::new([9; 32]);

        let batch = reconstruct_batch(&builder(), &events, &market, &program_id, &resolver, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(batch.non_fills, 1);
        assert_eq!(batch.invalid, 1);
        assert_eq!(
            batch.trades.iter().map(|t| t.seq_num).collect::<Vec<_>>(),
            vec![21, 23, 25]
        );
        assert_eq!(batch.seq_range(), Some((21, 25)));
        assert_eq!(batch.trades[0].owner, Pubkey::new([11; 32]));
        assert_eq!(batch.trades[1].owner, Pubkey::new([12; 32]));
        assert_eq!(resolver.calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_without_fills_resolves_nothing() {
        let resolver = MapOwnerResolver::new();
        let events = sequenced(vec![cancel(Pubkey::new([1; 32])), cancel(Pubkey::new([2; 32]))], 1);

        let batch = reconstruct_batch(
            &builder(),
            &events,
            &testing::market("SOL", 137),
            &Pubkey::default(),
            &resolver,
            TIMEOUT,
        )
        .await
        .unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.non_fills, 2);
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_batch_fails_on_unresolved_owner() {
        let known = Pubkey::new([1; 32]);
        let unknown = Pubkey::new([2; 32]);
        let resolver = MapOwnerResolver::new();
        resolver.insert(known, Pubkey::new([11; 32]));

        let events = sequenced(
            vec![fill(known, true, true, 1000, 10), fill(unknown, true, true, 1000, 10)],
            1,
        );

        let err = reconstruct_batch(
            &builder(),
            &events,
            &testing::market("SOL", 137),
            &Pubkey::default(),
            &resolver,
            TIMEOUT,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Resolution { handle, .. } if handle == unknown));
    }

    #[tokio::test]
    async fn test_batch_on_spawned_task() {
        let handle = Pubkey::new([1; 32]);
        let resolver = Arc::new(MapOwnerResolver::new());
        resolver.insert(handle, Pubkey::new([11; 32]));
        let events = sequenced(
            vec![fill(handle, true, true, 1000, 10), fill(handle, false, false, 10, 1000)],
            7,
        );

        let batch = tokio::spawn(async move {
            reconstruct_batch(
                &builder(),
                &events,
                &testing::market("SOL", 137),
                &Pubkey::default(),
                resolver.as_ref(),
                TIMEOUT,
            )
            .await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(batch.seq_range(), Some((7, 8)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_resolution_timeout() {
        let handle = Pubkey::new([1; 32]);
        let resolver = MapOwnerResolver::new();
        resolver.insert(handle, Pubkey::new([11; 32]));
        resolver.set_hang(true);

        let events = sequenced(vec![fill(handle, true, true, 1000, 10)], 1);

        let err = reconstruct_batch(
            &builder(),
            &events,
            &testing::market("SOL", 137),
            &Pubkey::default(),
            &resolver,
            TIMEOUT,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, IngestError::Timeout(Operation::Resolve)));
    }
}
