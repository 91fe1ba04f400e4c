//! Binary layout of the Serum-style event queue account.

use super::DecodeError;
use crate::types::{ClientOrderId, OrderId, Pubkey};

pub const HEADER_MAGIC: &[u8; 5] = b"serum";
pub const TRAILER_MAGIC: &[u8; 7] = b"padding";

/// Magic, account flags, head, count and sequence number.
pub const HEADER_SIZE: usize = 5 + 8 * 4;

pub const EVENT_SIZE: usize = 88;

/// Account kind flags stored right after the header magic.
pub mod account_flags {
    pub const INITIALIZED: u64 = 1 << 0;
    pub const MARKET: u64 = 1 << 1;
    pub const OPEN_ORDERS: u64 = 1 << 2;
    pub const REQUEST_QUEUE: u64 = 1 << 3;
    pub const EVENT_QUEUE: u64 = 1 << 4;
    pub const BIDS: u64 = 1 << 5;
    pub const ASKS: u64 = 1 << 6;

    pub(crate) const OTHER_KINDS: u64 = MARKET | OPEN_ORDERS | REQUEST_QUEUE | BIDS | ASKS;
}

const FLAG_FILL: u8 = 0x1;
const FLAG_OUT: u8 = 0x2;
const FLAG_BID: u8 = 0x4;
const FLAG_MAKER: u8 = 0x8;
const FLAG_RELEASE_FUNDS: u8 = 0x10;

/// Event type flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventFlags {
    pub fill: bool,
    pub out: bool,
    pub bid: bool,
    pub maker: bool,
    pub release_funds: bool,
}

impl EventFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            fill: bits & FLAG_FILL != 0,
            out: bits & FLAG_OUT != 0,
            bid: bits & FLAG_BID != 0,
            maker: bits & FLAG_MAKER != 0,
            release_funds: bits & FLAG_RELEASE_FUNDS != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        for (set, flag) in [
            (self.fill, FLAG_FILL),
            (self.out, FLAG_OUT),
            (self.bid, FLAG_BID),
            (self.maker, FLAG_MAKER),
            (self.release_funds, FLAG_RELEASE_FUNDS),
        ] {
            if set {
                bits |= flag;
            }
        }
        bits
    }
}

/// Single ring buffer slot as stored on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub flags: EventFlags,
    pub owner_slot: u8,
    pub fee_tier: u8,
    pub native_qty_released: u128, // account stores 64 bits
    pub native_qty_paid: u128,     // account stores 64 bits
    pub native_fee_or_rebate: u64,
    pub order_id: OrderId,
    /// Open orders account of the order, resolved to the owner separately.
    pub owner_handle: Pubkey,
    pub client_order_id: ClientOrderId,
}

/// Queue header: ring head, live record count and the total number
/// of records ever appended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventQueueHeader {
    account_flags: u64,
    head: u64,
    count: u64,
    seq_num: u64,
}

impl EventQueueHeader {
    pub fn new(account_flags: u64, head: u64, count: u64, seq_num: u64) -> Self {
        Self {
            account_flags,
            head,
            count,
            seq_num,
        }
    }

    pub fn account_flags(&self) -> u64 {
        self.account_flags
    }

    /// Slot index of the oldest live record.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Number of live records in the ring.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Number of records ever appended, fills and cancels alike.
    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        if &r.bytes::<5>()? != HEADER_MAGIC {
            return Err(DecodeError::InvalidHeaderMagic);
        }
        Ok(Self {
            account_flags: r.u64()?,
            head: r.u64()?,
            count: r.u64()?,
            seq_num: r.u64()?,
        })
    }

    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0; HEADER_SIZE];
        out[..5].copy_from_slice(HEADER_MAGIC);
        out[5..13].copy_from_slice(&self.account_flags.to_le_bytes());
        out[13..21].copy_from_slice(&self.head.to_le_bytes());
        out[21..29].copy_from_slice(&self.count.to_le_bytes());
        out[29..37].copy_from_slice(&self.seq_num.to_le_bytes());
        out
    }
}

impl RawEvent {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let flags = EventFlags::from_bits(r.u8()?);
        let owner_slot = r.u8()?;
        let fee_tier = r.u8()?;
        r.bytes::<5>()?;
        Ok(Self {
            flags,
            owner_slot,
            fee_tier,
            native_qty_released: r.u64()? as u128,
            native_qty_paid: r.u64()? as u128,
            native_fee_or_rebate: r.u64()?,
            order_id: r.u128()?,
            owner_handle: Pubkey::new(r.bytes::<32>()?),
            client_order_id: r.u64()?,
        })
    }

    /// Native quantities above `u64::MAX` saturate, the account can not hold them.
    pub(crate) fn encode(&self) -> [u8; EVENT_SIZE] {
        let narrow = |v: u128| u64::try_from(v).unwrap_or(u64::MAX);
        let mut out = [0; EVENT_SIZE];
        out[0] = self.flags.bits();
        out[1] = self.owner_slot;
        out[2] = self.fee_tier;
        out[8..16].copy_from_slice(&narrow(self.native_qty_released).to_le_bytes());
        out[16..24].copy_from_slice(&narrow(self.native_qty_paid).to_le_bytes());
        out[24..32].copy_from_slice(&self.native_fee_or_rebate.to_le_bytes());
        out[32..48].copy_from_slice(&self.order_id.to_le_bytes());
        out[48..80].copy_from_slice(self.owner_handle.as_bytes());
        out[80..88].copy_from_slice(&self.client_order_id.to_le_bytes());
        out
    }
}

/// Little-endian cursor over account bytes.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let (head, rest) = self
            .buf
            .split_first_chunk::<N>()
            .ok_or(DecodeError::Truncated)?;
        self.buf = rest;
        Ok(*head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn u128(&mut self) -> Result<u128, DecodeError> {
        Ok(u128::from_le_bytes(self.bytes()?))
    }
}
