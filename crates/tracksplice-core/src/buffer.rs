use std::{collections::TryReserveError, fmt, ops::Range};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(usize);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    samples: Vec<i16>,
    refcount: usize,
}

impl Buffer {
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }
}

/// Arena of buffers. Freed slots are recycled, so a `BufferId` is only
/// meaningful while at least one segment retains it.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    slots: Vec<Option<Buffer>>,
    free: Vec<usize>,
}

impl BufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, samples: Vec<i16>) -> Result<BufferId, TryReserveError> {
        let buffer = Buffer {
            samples,
            refcount: 1,
        };

        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(buffer);
            return Ok(BufferId(index));
        }

        self.slots.try_reserve(1)?;
        self.slots.push(Some(buffer));
        Ok(BufferId(self.slots.len() - 1))
    }

    pub fn reserve_releases(&mut self, releases: usize) -> Result<(), TryReserveError> {
        self.free.try_reserve(releases)
    }

    pub fn retain(&mut self, id: BufferId) {
        self.slot_mut(id).refcount += 1;
    }

    /// Drops one reference; returns `true` when the buffer was freed.
    pub fn release(&mut self, id: BufferId) -> bool {
        let buffer = self.slot_mut(id);
        buffer.refcount -= 1;
        if buffer.refcount > 0 {
            return false;
        }

        self.slots[id.0] = None;
        self.free.push(id.0);
        true
    }

    #[must_use]
    pub fn get(&self, id: BufferId) -> Option<&Buffer> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn slice(&self, id: BufferId, range: Range<usize>) -> &[i16] {
        &self[id].samples[range]
    }

    pub fn slice_mut(&mut self, id: BufferId, range: Range<usize>) -> &mut [i16] {
        &mut self.slot_mut(id).samples[range]
    }

    /// Appends `gap` zeros followed by `tail` in place.
    ///
    /// Only valid while the buffer is exclusively owned (`refcount == 1`):
    /// a shared buffer must never change length under another segment.
    pub fn grow(&mut self, id: BufferId, gap: usize, tail: &[i16]) -> Result<(), TryReserveError> {
        let buffer = self.slot_mut(id);
        debug_assert_eq!(buffer.refcount, 1, "grow on shared buffer {id}");
        buffer.samples.try_reserve_exact(gap + tail.len())?;
        buffer.samples.resize(buffer.samples.len() + gap, 0);
        buffer.samples.extend_from_slice(tail);
        Ok(())
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|buffer| (BufferId(index), buffer)))
    }

    fn slot_mut(&mut self, id: BufferId) -> &mut Buffer {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(buffer) => buffer,
            None => panic!("stale buffer handle {id}"),
        }
    }
}

impl std::ops::Index<BufferId> for BufferPool {
    type Output = Buffer;

    fn index(&self, id: BufferId) -> &Self::Output {
        match self.get(id) {
            Some(buffer) => buffer,
            None => panic!("stale buffer handle {id}"),
        }
    }
}

pub fn zero_padded(gap: usize, tail: &[i16]) -> Result<Vec<i16>, TryReserveError> {
    let mut samples = Vec::new();
    samples.try_reserve_exact(gap + tail.len())?;
    samples.resize(gap, 0);
    samples.extend_from_slice(tail);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_frees_at_zero_and_recycles_slot() {
        let mut pool = BufferPool::new();
        let first = pool.allocate(vec![1, 2, 3]).expect("allocation should succeed");
        pool.retain(first);
        assert_eq!(pool[first].refcount(), 2);

        assert!(!pool.release(first));
        assert!(pool.release(first));
        assert!(pool.get(first).is_none());
        assert_eq!(pool.live_count(), 0);

        let second = pool.allocate(vec![9]).expect("allocation should succeed");
        assert_eq!(first, second);
        assert_eq!(pool[second].samples(), &[9]);
    }

    #[test]
    fn reserved_releases_do_not_grow_the_free_list() {
        let mut pool = BufferPool::new();
        let ids: Vec<BufferId> = (0..3)
            .map(|sample| pool.allocate(vec![sample]).expect("allocation should succeed"))
            .collect();

        pool.reserve_releases(ids.len())
            .expect("reservation should succeed");
        let reserved = pool.free.capacity();
        assert!(reserved >= ids.len());

        for id in ids {
            assert!(pool.release(id));
        }
        assert_eq!(pool.free.capacity(), reserved);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn grow_appends_zero_gap_then_tail() {
        let mut pool = BufferPool::new();
        let id = pool.allocate(vec![5]).expect("allocation should succeed");
        pool.grow(id, 2, &[7, 8]).expect("grow should succeed");
        assert_eq!(pool[id].samples(), &[5, 0, 0, 7, 8]);
    }

    #[test]
    fn slice_mut_writes_through_shared_storage() {
        let mut pool = BufferPool::new();
        let id = pool.allocate(vec![0; 4]).expect("allocation should succeed");
        pool.slice_mut(id, 1..3).copy_from_slice(&[4, 4]);
        assert_eq!(pool.slice(id, 0..4), &[0, 4, 4, 0]);
    }

    #[test]
    fn zero_padded_prefixes_gap() {
        let samples = zero_padded(3, &[1, -1]).expect("allocation should succeed");
        assert_eq!(samples, vec![0, 0, 0, 1, -1]);
    }
}
