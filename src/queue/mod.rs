//! Event queue decoding.
//!
//! The event queue is a fixed-capacity ring buffer account the exchange program
//! appends order book events to (fills and cancels). Records are identified by
//! the header sequence number, which counts every record ever appended, so the
//! records newer than a checkpoint are the last `seq_num - checkpoint` slots
//! before the write cursor.
//!
//! [`decode`] parses raw account bytes and returns the records appended since
//! the given checkpoint, oldest first, each tagged with its own sequence number.
//! Two conditions are reported instead of records:
//!
//! * [`QueueRead::Stale`] - header sequence number is behind the checkpoint,
//!   i.e. the account was served by a lagging replica.
//!
//! * [`QueueRead::Gap`] - more records were appended since the checkpoint than
//!   the ring keeps live, some of them are no longer observable.

mod error;
mod layout;


pub use error::DecodeError;
pub use layout::{
    EVENT_SIZE, EventFlags, EventQueueHeader, HEADER_MAGIC, HEADER_SIZE, RawEvent, TRAILER_MAGIC,
    account_flags,
};

use crate::types::SeqNum;

/// Ring buffer record along with its sequence number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequencedEvent {
    pub seq_num: SeqNum,
    pub event: RawEvent,
}

/// Result of reading the queue relative to a checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueRead {
    /// Records appended since the checkpoint, oldest first. Might be empty.
    Fresh {
        header: EventQueueHeader,
        events: Vec<SequencedEvent>,
    },

    /// Header sequence number regressed below the checkpoint.
    Stale {
        header: EventQueueHeader,
        last_seq_num: SeqNum,
    },

    /// Records between the checkpoint and the live window were overwritten.
    Gap {
        header: EventQueueHeader,
        last_seq_num: SeqNum,
    },
}

impl QueueRead {
    pub fn header(&self) -> &EventQueueHeader {
        match self {
            QueueRead::Fresh { header, .. }
            | QueueRead::Stale { header, .. }
            | QueueRead::Gap { header, .. } => header,
        }
    }
}

/// Borrowed view over event queue account bytes, slots are decoded lazily.
#[derive(Clone, Copy, Debug)]
pub struct EventQueue<'a> {
    header: EventQueueHeader,
    capacity: usize,
    slots: &'a [u8],
}

impl<'a> EventQueue<'a> {
    /// Validates the account layout and parses the header.
    pub fn parse(data: &'a [u8]) -> Result<Self, DecodeError> {
        let len = data.len();
        let body = len
            .checked_sub(HEADER_SIZE + TRAILER_MAGIC.len())
            .filter(|body| *body > 0 && body % EVENT_SIZE == 0)
            .ok_or(DecodeError::InvalidLength { len })?;
        let capacity = body / EVENT_SIZE;

        if !data.ends_with(TRAILER_MAGIC) {
            return Err(DecodeError::InvalidTrailerMagic);
        }

        let header = EventQueueHeader::parse(data)?;
        let flags = header.account_flags();
        if flags & account_flags::INITIALIZED == 0
            || flags & account_flags::EVENT_QUEUE == 0
            || flags & account_flags::OTHER_KINDS != 0
        {
            return Err(DecodeError::NotAnEventQueue {
                account_flags: flags,
            });
        }
        if header.head() >= capacity as u64 {
            return Err(DecodeError::HeadOutOfRange {
                head: header.head(),
                capacity,
            });
        }
        if header.count() > capacity as u64 {
            return Err(DecodeError::CountOutOfRange {
                count: header.count(),
                capacity,
            });
        }

        Ok(Self {
            header,
            capacity,
            slots: &data[HEADER_SIZE..HEADER_SIZE + body],
        })
    }

    pub fn header(&self) -> &EventQueueHeader {
        &self.header
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot the next appended record is written to.
    pub fn write_cursor(&self) -> usize {
        ((self.header.head() + self.header.count()) % self.capacity as u64) as usize
    }

    pub fn slot(&self, index: usize) -> Result<RawEvent, DecodeError> {
        if index >= self.capacity {
            return Err(DecodeError::SlotOutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        let offset = index * EVENT_SIZE;
        RawEvent::parse(&self.slots[offset..offset + EVENT_SIZE])
    }

    /// Returns the `n` most recently appended live records, oldest first.
    ///
    /// `n` is capped by the number of live records.
    pub fn recent(&self, n: u64) -> Result<Vec<SequencedEvent>, DecodeError> {
        let n = n.min(self.header.count()).min(self.header.seq_num());
        let cursor = self.write_cursor();
        let mut events = Vec::with_capacity(n as usize);
        for back in (1..=n as usize).rev() {
            let index = (cursor + self.capacity - back) % self.capacity;
            events.push(SequencedEvent {
                seq_num: self.header.seq_num() - back as u64 + 1,
                event: self.slot(index)?,
            });
        }
        Ok(events)
    }

    /// Reads records appended after `last_seq_num`.
    ///
    /// Without a checkpoint every live record is considered new.
    pub fn read_since(&self, last_seq_num: Option<SeqNum>) -> Result<QueueRead, DecodeError> {
        let header = self.header;
        let Some(last_seq_num) = last_seq_num else {
            return Ok(QueueRead::Fresh {
                header,
                events: self.recent(header.count())?,
            });
        };

        if header.seq_num() < last_seq_num {
            return Ok(QueueRead::Stale {
                header,
                last_seq_num,
            });
        }

        let appended = header.seq_num() - last_seq_num;
        if appended > header.count() {
            return Ok(QueueRead::Gap {
                header,
                last_seq_num,
            });
        }

        Ok(QueueRead::Fresh {
            header,
            events: self.recent(appended)?,
        })
    }
}

/// Decodes event queue account bytes and returns records newer than `last_seq_num`.
pub fn decode(data: &[u8], last_seq_num: Option<SeqNum>) -> Result<QueueRead, DecodeError> {
    EventQueue::parse(data)?.read_since(last_seq_num)
}
