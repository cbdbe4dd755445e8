use crate::{
    error::MeterError,
    register_encoder::{RegisterBlock, REGISTER_COUNT},
};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

/// A complete register publication together with the generation that wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub generation: u64,
    pub values: Vec<u16>,
}

#[derive(Debug)]
struct Published {
    generation: u64,
    block: RegisterBlock,
}

/// Holding register table shared between the update loop and the server.
///
/// The whole block is swapped under one write lock, and readers copy their
/// slice out under a read lock before doing any I/O, so no reader can see two
/// generations at once and none can hold up the writer for a network
/// round trip.
#[derive(Debug, Clone)]
pub struct RegisterStore {
    registers: Arc<RwLock<Published>>,
}

impl RegisterStore {
    /// Creates a store holding `initial` as generation 0
    pub fn new(initial: RegisterBlock) -> Self {
        Self {
            registers: Arc::new(RwLock::new(Published {
                generation: 0,
                block: initial,
            })),
        }
    }

    /// Replaces every register at once, returning the new generation.
    ///
    /// A lock poisoned by a panicking writer fails this one write and is
    /// cleared, so the next write goes through.
    pub fn write_all(&self, values: RegisterBlock) -> Result<u64, MeterError> {
        let mut published = self.registers.write().map_err(|_| {
            warn!("Register store lock was poisoned, clearing it");
            self.registers.clear_poison();
            MeterError::TransientStoreUnavailable
        })?;
        published.generation += 1;
        published.block = values;
        Ok(published.generation)
    }

    /// Copies `count` registers starting at index `start`
    pub fn read_range(&self, start: u16, count: u16) -> Result<Vec<u16>, MeterError> {
        self.snapshot(start, count).map(|snapshot| snapshot.values)
    }

    /// Like [`RegisterStore::read_range`], also reporting the generation read
    pub fn snapshot(&self, start: u16, count: u16) -> Result<Snapshot, MeterError> {
        let begin = start as usize;
        let end = begin + count as usize;
        if end > REGISTER_COUNT {
            return Err(MeterError::OutOfRange {
                start,
                count,
                size: REGISTER_COUNT,
            });
        }
        // The block is replaced by a single assignment, so a poisoned lock
        // still holds a whole generation
        let published = self
            .registers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Snapshot {
            generation: published.generation,
            values: published.block[begin..end].to_vec(),
        })
    }
}
