use std::{collections::TryReserveError, fmt};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    buffer::{BufferId, BufferPool},
    session::EditError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(usize);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg#{}", self.0)
    }
}

/// A slice `[offset, offset + length)` of one buffer.
///
/// `alias_source_count` counts the live segments whose `alias_of` points
/// here. While it is non-zero the segment's extent is frozen: it may be
/// overwritten but not split, merged or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub buffer: BufferId,
    pub offset: usize,
    pub length: usize,
    pub alias_source_count: usize,
    pub alias_of: Option<SegmentId>,
}

impl Segment {
    #[must_use]
    pub fn new(buffer: BufferId, offset: usize, length: usize) -> Self {
        Self {
            buffer,
            offset,
            length,
            alias_source_count: 0,
            alias_of: None,
        }
    }

    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    #[must_use]
    pub fn is_aliased(&self) -> bool {
        self.alias_source_count > 0
    }

    #[must_use]
    pub fn can_absorb(&self, next: &Segment) -> bool {
        !self.is_aliased()
            && !next.is_aliased()
            && self.alias_of == next.alias_of
            && self.buffer == next.buffer
            && self.end() == next.offset
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentPool {
    slots: Vec<Option<Segment>>,
    free: Vec<usize>,
}

impl SegmentPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        let fresh = additional.saturating_sub(self.free.len());
        self.slots.try_reserve(fresh)?;
        Ok(())
    }

    pub fn reserve_removals(&mut self, removals: usize) -> Result<(), TryReserveError> {
        self.free.try_reserve(removals)
    }

    pub fn insert(&mut self, segment: Segment) -> SegmentId {
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(segment);
            return SegmentId(index);
        }
        self.slots.push(Some(segment));
        SegmentId(self.slots.len() - 1)
    }

    pub fn remove(&mut self, id: SegmentId) -> Segment {
        match self.slots.get_mut(id.0).and_then(Option::take) {
            Some(segment) => {
                self.free.push(id.0);
                segment
            }
            None => panic!("stale segment handle {id}"),
        }
    }

    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|segment| (SegmentId(index), segment)))
    }

    pub fn check_split(&self, id: SegmentId, local_offset: usize) -> Result<(), EditError> {
        let segment = &self[id];
        if segment.is_aliased() {
            return Err(EditError::AliasConflict {
                segment: id,
                aliases: segment.alias_source_count,
            });
        }
        if local_offset == 0 || local_offset >= segment.length {
            return Err(EditError::InvalidSplit {
                offset: local_offset,
                length: segment.length,
            });
        }
        Ok(())
    }

    /// The left piece keeps `id`. Splitting an alias gives its source one
    /// more dependant.
    pub fn split(
        &mut self,
        buffers: &mut BufferPool,
        id: SegmentId,
        local_offset: usize,
    ) -> Result<SegmentId, EditError> {
        self.check_split(id, local_offset)?;

        let left = self.slot_mut(id);
        let right = Segment {
            buffer: left.buffer,
            offset: left.offset + local_offset,
            length: left.length - local_offset,
            alias_source_count: 0,
            alias_of: left.alias_of,
        };
        left.length = local_offset;

        buffers.retain(right.buffer);
        if let Some(source) = right.alias_of {
            self.slot_mut(source).alias_source_count += 1;
        }

        let right_id = self.insert(right);
        debug!(%id, %right_id, local_offset, "segment split");
        Ok(right_id)
    }

    pub fn absorb(&mut self, buffers: &mut BufferPool, id: SegmentId, next: SegmentId) -> bool {
        if !self[id].can_absorb(&self[next]) {
            return false;
        }

        let absorbed = self.remove(next);
        self.slot_mut(id).length += absorbed.length;
        buffers.release(absorbed.buffer);
        if let Some(source) = absorbed.alias_of {
            self.slot_mut(source).alias_source_count -= 1;
        }
        true
    }

    pub fn slot_mut(&mut self, id: SegmentId) -> &mut Segment {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(segment) => segment,
            None => panic!("stale segment handle {id}"),
        }
    }
}

impl std::ops::Index<SegmentId> for SegmentPool {
    type Output = Segment;

    fn index(&self, id: SegmentId) -> &Self::Output {
        match self.get(id) {
            Some(segment) => segment,
            None => panic!("stale segment handle {id}"),
        }
    }
}
