use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::crossing::{CrossingEvent, Direction};
use serde_derive::Serialize;

const A_TO_B_ONE: u64 = 1 << 32;
const B_TO_A_ONE: u64 = 1;
const HALF_MASK: u64 = 0xFFFF_FFFF;

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub a_to_b: u32,
    pub b_to_a: u32,
    pub total: u64,
}

impl Counts {
    fn unpack(word: u64) -> Self {
        let a_to_b = (word >> 32) as u32;
        let b_to_a = (word & HALF_MASK) as u32;

        Self {
            a_to_b,
            b_to_a,
            total: a_to_b as u64 + b_to_a as u64,
        }
    }

    #[inline]
    pub fn get(&self, direction: Direction) -> u32 {
        match direction {
            Direction::AToB => self.a_to_b,
            Direction::BToA => self.b_to_a,
        }
    }
}

/// Bidirectional crossing totals.
///
/// Both directions live in one atomic word, so a snapshot can never pair a
/// stale half with a fresh one and readers never wait on the pipeline.
#[derive(Debug, Default)]
pub struct Counter {
    packed: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &CrossingEvent) {
        let one = match event.direction {
            Direction::AToB => A_TO_B_ONE,
            Direction::BToA => B_TO_A_ONE,
        };

        self.packed.fetch_add(one, Ordering::AcqRel);
    }

    #[inline]
    pub fn snapshot(&self) -> Counts {
        Counts::unpack(self.packed.load(Ordering::Acquire))
    }

    /// Read-only view for other threads.
    pub fn handle(&self) -> CounterHandle {
        CounterHandle {
            packed: Arc::clone(&self.packed),
        }
    }

    pub(crate) fn reset(&self) {
        self.packed.store(0, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct CounterHandle {
    packed: Arc<AtomicU64>,
}

impl CounterHandle {
    #[inline]
    pub fn snapshot(&self) -> Counts {
        Counts::unpack(self.packed.load(Ordering::Acquire))
    }
}
