//! In-memory test environment and test utilities.
//!
//! [`EventQueueBuilder`] simulates appends to an event queue account and
//! produces its raw bytes, so decoder and coordinator tests run against the
//! exact on-chain layout.
//!
//! Fakes of the external collaborators: [`StaticAccountSource`] and
//! [`GatedAccountSource`] serve account bytes, [`MapOwnerResolver`] resolves
//! owners, [`MemorySink`] stores trades by identity, [`MemoryCheckpointStore`]
//! keeps the last saved checkpoints and [`RecordingAlerter`] collects alerts.
//! Each of them can be told to fail or hang.
//!

use std::{
    collections::HashSet,
    ops::RangeInclusive,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use fastnum::{UD64, udec128};
use tokio::sync::{Notify, Semaphore, watch};

use crate::{
    alert::{Alert, Alerter},
    checkpoint::{CheckpointError, CheckpointStore, Checkpoints},
    queue::{EVENT_SIZE, EventFlags, EventQueueHeader, RawEvent, TRAILER_MAGIC, account_flags},
    resolver::{OwnerResolver, ResolveError},
    sink::{SinkError, TradeSink},
    source::{AccountSource, SourceError},
    types::{Asset, Kind, MarketContext, MarketIndex, Pubkey, SeqNum, Trade, TradeKey},
};

/// Fill event of `owner_handle` with the given native quantities.
pub fn fill(owner_handle: Pubkey, bid: bool, maker: bool, paid: u128, released: u128) -> RawEvent {
    RawEvent {
        flags: EventFlags {
            fill: true,
            bid,
            maker,
            release_funds: maker,
            ..EventFlags::default()
        },
        owner_slot: 0,
        fee_tier: 0,
        native_qty_released: released,
        native_qty_paid: paid,
        native_fee_or_rebate: 0,
        order_id: 1,
        owner_handle,
        client_order_id: 0,
    }
}

/// Out (cancel) event of `owner_handle`.
pub fn cancel(owner_handle: Pubkey) -> RawEvent {
    RawEvent {
        flags: EventFlags {
            out: true,
            release_funds: true,
            ..EventFlags::default()
        },
        native_qty_paid: 0,
        native_qty_released: 500,
        ..fill(owner_handle, false, false, 0, 0)
    }
}

/// Perpetual market with an event queue address derived from its key.
pub fn market(asset: &str, market_index: MarketIndex) -> MarketContext {
    let mut event_queue = [0u8; 32];
    event_queue[..4].copy_from_slice(&market_index.to_le_bytes());
    for (dst, src) in event_queue[4..].iter_mut().zip(asset.bytes()) {
        *dst = src;
    }
    event_queue[31] = 0xEE;

    MarketContext {
        asset: Asset::new(asset),
        market_index,
        kind: Kind::Perp,
        strike: UD64::ZERO,
        expiry_timestamp: 0,
        event_queue: Pubkey::new(event_queue),
    }
}

/// Trades of the market with the given sequence numbers.
pub fn trades(asset: &str, market_index: MarketIndex, seq_nums: RangeInclusive<SeqNum>) -> Vec<Trade> {
    seq_nums
        .map(|seq_num| Trade {
            seq_num,
            order_id: seq_num as u128,
            client_order_id: 0,
            timestamp: 1_700_000_000,
            owner: Pubkey::new([7; 32]),
            asset: Asset::new(asset),
            market_index,
            strike: UD64::ZERO,
            kind: Kind::Perp,
            expiry_timestamp: 0,
            is_maker: false,
            is_bid: true,
            price: udec128!(100),
            size: udec128!(1),
        })
        .collect()
}

/// Builder of event queue account bytes.
///
/// ```ignore
/// let mut queue = EventQueueBuilder::new(8);
/// queue.push(fill(handle, true, false, 1000, 10));
/// queue.consume(1);
/// let data = queue.build();
/// ```
#[derive(Clone, Debug)]
pub struct EventQueueBuilder {
    slots: Vec<Option<RawEvent>>,
    account_flags: u64,
    head: usize,
    count: usize,
    seq_num: SeqNum,
}

impl EventQueueBuilder {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            account_flags: account_flags::INITIALIZED | account_flags::EVENT_QUEUE,
            head: 0,
            count: 0,
            seq_num: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Appends an event, overwriting the oldest live one if the ring is full.
    pub fn push(&mut self, event: RawEvent) -> SeqNum {
        let capacity = self.capacity();
        if self.count == capacity {
            self.head = (self.head + 1) % capacity;
            self.count -= 1;
        }
        self.slots[(self.head + self.count) % capacity] = Some(event);
        self.count += 1;
        self.seq_num += 1;
        self.seq_num
    }

    /// Marks the `n` oldest live events consumed.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.count);
        self.head = (self.head + n) % self.capacity();
        self.count -= n;
    }

    /// Sets the number of events appended before the first push.
    pub fn starting_at(&mut self, seq_num: SeqNum) {
        self.seq_num = seq_num;
    }

    pub fn with_account_flags(&mut self, account_flags: u64) {
        self.account_flags = account_flags;
    }

    pub fn header(&self) -> EventQueueHeader {
        EventQueueHeader::new(
            self.account_flags,
            self.head as u64,
            self.count as u64,
            self.seq_num,
        )
    }

    pub fn build(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            self.header().encode().len() + EVENT_SIZE * self.capacity() + TRAILER_MAGIC.len(),
        );
        data.extend_from_slice(&self.header().encode());
        for slot in &self.slots {
            match slot {
                Some(event) => data.extend_from_slice(&event.encode()),
                None => data.extend_from_slice(&[0; EVENT_SIZE]),
            }
        }
        data.extend_from_slice(TRAILER_MAGIC);
        data
    }
}

/// Account source serving fixed bytes per address.
#[derive(Debug, Default)]
pub struct StaticAccountSource {
    accounts: DashMap<Pubkey, Vec<u8>>,
    failing: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl StaticAccountSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.insert(address, data);
    }

    /// Fails every fetch while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Never completes a fetch while set.
    pub fn set_hang(&self, hang: bool) {
        self.hanging.store(hang, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountSource for StaticAccountSource {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Vec<u8>, SourceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.hanging.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::Relaxed) {
            return Err(SourceError::Other("injected fetch failure".to_string()));
        }
        self.accounts
            .get(address)
            .map(|data| data.clone())
            .ok_or(SourceError::AccountNotFound(*address))
    }
}

/// Account source holding every fetch until released.
#[derive(Debug)]
pub struct GatedAccountSource {
    inner: StaticAccountSource,
    entered: Notify,
    gate: Semaphore,
}

impl Default for GatedAccountSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GatedAccountSource {
    pub fn new() -> Self {
        Self {
            inner: StaticAccountSource::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn set(&self, address: Pubkey, data: Vec<u8>) {
        self.inner.set(address, data);
    }

    /// Waits until a fetch is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one held fetch complete.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

#[async_trait]
impl AccountSource for GatedAccountSource {
    async fn account_bytes(&self, address: &Pubkey) -> Result<Vec<u8>, SourceError> {
        self.entered.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.inner.account_bytes(address).await
    }
}

/// Owner resolver backed by a map of handle to owner.
#[derive(Debug, Default)]
pub struct MapOwnerResolver {
    owners: DashMap<Pubkey, Pubkey>,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl MapOwnerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, owner_handle: Pubkey, owner: Pubkey) {
        self.owners.insert(owner_handle, owner);
    }

    pub fn remove(&self, owner_handle: &Pubkey) {
        self.owners.remove(owner_handle);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hanging.store(hang, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OwnerResolver for MapOwnerResolver {
    async fn resolve_owner(
        &self,
        _program_id: &Pubkey,
        owner_handle: &Pubkey,
    ) -> Result<Pubkey, ResolveError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.hanging.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        self.owners
            .get(owner_handle)
            .map(|owner| *owner)
            .ok_or(ResolveError::AccountNotFound(*owner_handle))
    }
}

/// Sink storing trades by identity, like an idempotent table.
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    max_batch: usize,
    trades: DashMap<TradeKey, Trade>,
    received: AtomicUsize,
    batches: Mutex<Vec<usize>>,
    failing_chunks: Mutex<HashSet<usize>>,
    hanging: AtomicBool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>, max_batch: usize) -> Self {
        Self {
            name: name.into(),
            max_batch,
            trades: DashMap::new(),
            received: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            failing_chunks: Mutex::new(HashSet::new()),
            hanging: AtomicBool::new(false),
        }
    }

    /// Fails the calls with the given indices, counted from the first call
    /// the sink ever received.
    pub fn fail_chunks(&self, calls: impl IntoIterator<Item = usize>) {
        self.failing_chunks.lock().unwrap().extend(calls);
    }

    pub fn set_hang(&self, hang: bool) {
        self.hanging.store(hang, Ordering::Relaxed);
    }

    /// Sizes of all batches received, including failed ones.
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of distinct trades stored.
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Number of trades accepted, counting re-deliveries.
    pub fn received(&self) -> usize {
        self.received.load(Ordering::Relaxed)
    }

    /// Stored trades ordered by identity.
    pub fn trades(&self) -> Vec<Trade> {
        let mut trades: Vec<_> = self.trades.iter().map(|t| t.value().clone()).collect();
        trades.sort_by_key(Trade::key);
        trades
    }

    pub fn contains(&self, key: &TradeKey) -> bool {
        self.trades.contains_key(key)
    }
}

#[async_trait]
impl TradeSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn put_batch(&self, trades: &[Trade]) -> Result<(), SinkError> {
        let call = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(trades.len());
            batches.len() - 1
        };
        if self.hanging.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        if self.failing_chunks.lock().unwrap().contains(&call) {
            return Err(SinkError::Unavailable(format!("injected failure of call {call}")));
        }

        for trade in trades {
            self.trades.insert(trade.key(), trade.clone());
        }
        self.received.fetch_add(trades.len(), Ordering::Relaxed);
        Ok(())
    }
}

/// Checkpoint store keeping the last saved checkpoints in memory.
#[derive(Debug)]
pub struct MemoryCheckpointStore {
    saved: watch::Sender<Checkpoints>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    failing_loads: AtomicUsize,
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::with_checkpoints(Checkpoints::new())
    }

    pub fn with_checkpoints(checkpoints: Checkpoints) -> Self {
        Self {
            saved: watch::Sender::new(checkpoints),
            attempts: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            failing_loads: AtomicUsize::new(0),
        }
    }

    /// Fails every save while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Fails the next `n` loads.
    pub fn fail_loads(&self, n: usize) {
        self.failing_loads.store(n, Ordering::Relaxed);
    }

    pub fn saved(&self) -> Checkpoints {
        self.saved.borrow().clone()
    }

    /// Notified on every successful save.
    pub fn subscribe(&self) -> watch::Receiver<Checkpoints> {
        self.saved.subscribe()
    }

    /// Number of save attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Checkpoints, CheckpointError> {
        let failing = self
            .failing_loads
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CheckpointError::Io(std::io::Error::other("injected load failure")));
        }
        Ok(self.saved())
    }

    async fn save(&self, checkpoints: &Checkpoints) -> Result<(), CheckpointError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(CheckpointError::Io(std::io::Error::other("injected save failure")));
        }
        self.saved.send_replace(checkpoints.clone());
        Ok(())
    }
}

/// Alerter collecting every alert.
#[derive(Debug, Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Alerter for RecordingAlerter {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}
