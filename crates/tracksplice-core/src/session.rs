use std::{
    collections::{BTreeMap, HashMap, HashSet, TryReserveError},
    fmt,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    buffer::{self, BufferId, BufferPool},
    identify::{self, IdentifyOptions, Match},
    segment::{Segment, SegmentId, SegmentPool},
};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),
    #[error("range {pos}+{len} is outside a track of length {length}")]
    InvalidRange { pos: usize, len: usize, length: usize },
    #[error("cannot split a segment of length {length} at {offset}")]
    InvalidSplit { offset: usize, length: usize },
    #[error("segment {segment} is the source of {aliases} alias(es)")]
    AliasConflict { segment: SegmentId, aliases: usize },
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("session invariant violated: {0}")]
    InvariantViolated(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(Uuid);

impl TrackId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub tracks: usize,
    pub live_buffers: usize,
    pub live_segments: usize,
    pub aliased_segments: usize,
    pub alias_segments: usize,
}

/// The ordered segment list of one track. `length` caches the sum of the
/// segment lengths.
#[derive(Debug, Clone, Default)]
struct Track {
    segments: Vec<SegmentId>,
    length: usize,
}

impl Track {
    fn locate(&self, segments: &SegmentPool, pos: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (index, &id) in self.segments.iter().enumerate() {
            let length = segments[id].length;
            if pos < start + length {
                return Some((index, start));
            }
            start += length;
        }
        None
    }

    /// The segment that a boundary at `pos` would cut, with the local cut
    /// offset. `None` when `pos` already falls on a boundary.
    fn straddling(&self, segments: &SegmentPool, pos: usize) -> Option<(usize, SegmentId, usize)> {
        let (index, start) = self.locate(segments, pos)?;
        (pos > start).then(|| (index, self.segments[index], pos - start))
    }

    fn check_boundary(&self, segments: &SegmentPool, pos: usize) -> Result<(), EditError> {
        match self.straddling(segments, pos) {
            Some((_, id, local_offset)) => segments.check_split(id, local_offset),
            None => Ok(()),
        }
    }

    /// Makes `pos` fall on a segment boundary. Logical positions are not
    /// affected. The caller must have reserved one slot in both the pool and
    /// `self.segments`.
    fn split_at(
        &mut self,
        segments: &mut SegmentPool,
        buffers: &mut BufferPool,
        pos: usize,
    ) -> Result<(), EditError> {
        if let Some((index, id, local_offset)) = self.straddling(segments, pos) {
            let right = segments.split(buffers, id, local_offset)?;
            self.segments.insert(index + 1, right);
        }
        Ok(())
    }

    fn boundary_index(&self, segments: &SegmentPool, pos: usize) -> usize {
        match self.locate(segments, pos) {
            Some((index, start)) => {
                debug_assert_eq!(start, pos, "position {pos} is not a segment boundary");
                index
            }
            None => self.segments.len(),
        }
    }

    fn overlapping<'a>(
        &'a self,
        segments: &'a SegmentPool,
        pos: usize,
        end: usize,
    ) -> impl Iterator<Item = (SegmentId, usize)> + 'a {
        let mut start = 0;
        self.segments
            .iter()
            .map(move |&id| {
                let segment_start = start;
                start += segments[id].length;
                (id, segment_start)
            })
            .take_while(move |&(_, segment_start)| segment_start < end)
            .filter(move |&(id, segment_start)| segment_start + segments[id].length > pos)
    }

    fn compact(&mut self, segments: &mut SegmentPool, buffers: &mut BufferPool) -> usize {
        let mut merged = 0;
        let mut kept = 0;
        for index in 0..self.segments.len() {
            let id = self.segments[index];
            if kept > 0 && segments.absorb(buffers, self.segments[kept - 1], id) {
                merged += 1;
                continue;
            }
            self.segments[kept] = id;
            kept += 1;
        }
        self.segments.truncate(kept);
        merged
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    buffers: BufferPool,
    segments: SegmentPool,
    tracks: HashMap<TrackId, Track>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            buffers: BufferPool::new(),
            segments: SegmentPool::new(),
            tracks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub fn init_track(&mut self) -> TrackId {
        let track_id = TrackId::new();
        self.tracks.insert(track_id, Track::default());
        info!(%track_id, "track created");
        track_id
    }

    #[instrument(skip(self, samples), fields(session_id = %self.id, len = samples.len()))]
    pub fn load_samples(&mut self, samples: &[i16]) -> Result<TrackId, EditError> {
        let track_id = self.init_track();
        if let Err(error) = self.write(track_id, 0, samples) {
            self.tracks.remove(&track_id);
            return Err(error);
        }
        Ok(track_id)
    }

    /// Frees a track. Refused while any of its segments is the source of an
    /// alias held by another track, since that alias would dangle. Aliases
    /// the track holds of itself go away together with their sources.
    #[instrument(skip(self), fields(session_id = %self.id, track_id = %track_id))]
    pub fn destroy_track(&mut self, track_id: TrackId) -> Result<(), EditError> {
        let track = self.track(track_id)?;
        let owned: HashSet<SegmentId> = track.segments.iter().copied().collect();
        let mut internal: HashMap<SegmentId, usize> = HashMap::new();
        for source in track
            .segments
            .iter()
            .filter_map(|&id| self.segments[id].alias_of)
            .filter(|source| owned.contains(source))
        {
            *internal.entry(source).or_default() += 1;
        }

        if let Some(error) = track.segments.iter().find_map(|&id| {
            let external = self.segments[id].alias_source_count
                - internal.get(&id).copied().unwrap_or_default();
            (external > 0).then_some(EditError::AliasConflict {
                segment: id,
                aliases: external,
            })
        }) {
            warn!(%error, "refused to destroy aliased track");
            return Err(error);
        }

        self.segments.reserve_removals(owned.len())?;
        self.buffers.reserve_releases(owned.len())?;
        let Some(track) = self.tracks.remove(&track_id) else {
            return Err(EditError::TrackNotFound(track_id));
        };
        for id in track.segments {
            let removed = self.segments.remove(id);
            self.buffers.release(removed.buffer);
            if let Some(source) = removed.alias_of.filter(|source| !owned.contains(source)) {
                self.segments.slot_mut(source).alias_source_count -= 1;
            }
        }
        info!(freed_segments = owned.len(), "track destroyed");
        Ok(())
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.keys().copied()
    }

    pub fn length(&self, track_id: TrackId) -> Result<usize, EditError> {
        Ok(self.track(track_id)?.length)
    }

    pub fn segment_count(&self, track_id: TrackId) -> Result<usize, EditError> {
        Ok(self.track(track_id)?.segments.len())
    }

    #[instrument(skip(self), fields(session_id = %self.id, track_id = %track_id))]
    pub fn read(&self, track_id: TrackId, pos: usize, len: usize) -> Result<Vec<i16>, EditError> {
        let track = self.track(track_id)?;
        if pos >= track.length || len == 0 {
            debug!(length = track.length, "empty read");
            return Ok(Vec::new());
        }

        let end = pos.saturating_add(len).min(track.length);
        let mut samples = Vec::new();
        samples.try_reserve_exact(end - pos)?;
        for (id, start) in track.overlapping(&self.segments, pos, end) {
            let segment = &self.segments[id];
            let from = pos.max(start) - start;
            let to = end.min(start + segment.length) - start;
            samples.extend_from_slice(
                self.buffers
                    .slice(segment.buffer, segment.offset + from..segment.offset + to),
            );
        }
        Ok(samples)
    }

    /// Existing coverage is written in place, so every alias sharing that
    /// storage observes the new values. No segment is split.
    #[instrument(skip(self, samples), fields(session_id = %self.id, track_id = %track_id, len = samples.len()))]
    pub fn write(&mut self, track_id: TrackId, pos: usize, samples: &[i16]) -> Result<(), EditError> {
        if samples.is_empty() {
            debug!("empty write");
            return Ok(());
        }

        let Self {
            buffers,
            segments,
            tracks,
            ..
        } = self;
        let track = tracks
            .get_mut(&track_id)
            .ok_or(EditError::TrackNotFound(track_id))?;
        let old_length = track.length;
        let end = pos.checked_add(samples.len()).ok_or(EditError::InvalidRange {
            pos,
            len: samples.len(),
            length: old_length,
        })?;

        // Growth is the only fallible step, so it runs first.
        if end > old_length {
            let gap = pos.saturating_sub(old_length);
            let tail = &samples[old_length.saturating_sub(pos)..];
            let grown = gap + tail.len();

            let exclusive_last = track.segments.last().copied().filter(|&id| {
                let segment = &segments[id];
                let buffer = &buffers[segment.buffer];
                buffer.refcount() == 1 && segment.end() == buffer.len()
            });

            if let Some(last) = exclusive_last {
                buffers.grow(segments[last].buffer, gap, tail)?;
                segments.slot_mut(last).length += grown;
                debug!(segment = %last, grown, "extended last segment in place");
            } else {
                let fresh = buffer::zero_padded(gap, tail)?;
                segments.reserve(1)?;
                track.segments.try_reserve(1)?;
                let buffer_id = buffers.allocate(fresh)?;
                let id = segments.insert(Segment::new(buffer_id, 0, grown));
                track.segments.push(id);
                debug!(segment = %id, buffer = %buffer_id, grown, "appended segment");
            }
            track.length = end;
        }

        if pos < old_length {
            let overlap_end = end.min(old_length);
            for (id, start) in track.overlapping(segments, pos, overlap_end) {
                let segment = &segments[id];
                let from = pos.max(start);
                let to = overlap_end.min(start + segment.length);
                let target = segment.offset + (from - start)..segment.offset + (to - start);
                buffers
                    .slice_mut(segment.buffer, target)
                    .copy_from_slice(&samples[from - pos..to - pos]);
            }
        }

        info!(pos, length = track.length, "samples written");
        Ok(())
    }

    /// All-or-nothing. The end is clamped to the track length; any alias
    /// source touching the range refuses the whole delete.
    #[instrument(skip(self), fields(session_id = %self.id, track_id = %track_id))]
    pub fn delete_range(&mut self, track_id: TrackId, pos: usize, len: usize) -> Result<(), EditError> {
        let Self {
            buffers,
            segments,
            tracks,
            ..
        } = self;
        let track = tracks
            .get_mut(&track_id)
            .ok_or(EditError::TrackNotFound(track_id))?;
        if len == 0 || pos >= track.length {
            debug!(length = track.length, "delete outside track");
            return Err(EditError::InvalidRange {
                pos,
                len,
                length: track.length,
            });
        }
        let end = pos.saturating_add(len).min(track.length);

        if let Some((id, _)) = track
            .overlapping(segments, pos, end)
            .find(|&(id, _)| segments[id].is_aliased())
        {
            let error = EditError::AliasConflict {
                segment: id,
                aliases: segments[id].alias_source_count,
            };
            warn!(%error, "delete refused");
            return Err(error);
        }

        // Every segment after the two splits may be drained or absorbed.
        let removals = track.segments.len() + 2;
        segments.reserve(2)?;
        segments.reserve_removals(removals)?;
        buffers.reserve_releases(removals)?;
        track.segments.try_reserve(2)?;
        track.split_at(segments, buffers, pos)?;
        track.split_at(segments, buffers, end)?;

        let first = track.boundary_index(segments, pos);
        let last = track.boundary_index(segments, end);
        for id in track.segments.drain(first..last) {
            let removed = segments.remove(id);
            buffers.release(removed.buffer);
            if let Some(source) = removed.alias_of {
                segments.slot_mut(source).alias_source_count -= 1;
            }
        }
        track.length -= end - pos;

        let merged = track.compact(segments, buffers);
        info!(pos, removed = end - pos, merged, length = track.length, "range deleted");
        Ok(())
    }

    /// Splices `[srcpos, srcpos + len)` of `src` into `dest` at `destpos`
    /// without copying: the inserted segments alias the source's storage, and
    /// the source segments become frozen until those aliases are deleted.
    ///
    /// `src` and `dest` may be the same track, with overlapping ranges.
    #[instrument(skip(self), fields(session_id = %self.id, src = %src, dest = %dest))]
    pub fn insert(
        &mut self,
        src: TrackId,
        dest: TrackId,
        destpos: usize,
        srcpos: usize,
        len: usize,
    ) -> Result<(), EditError> {
        let src_track = self.track(src)?;
        let dest_track = self.track(dest)?;
        let src_end = srcpos
            .checked_add(len)
            .filter(|&end| len > 0 && end <= src_track.length)
            .ok_or(EditError::InvalidRange {
                pos: srcpos,
                len,
                length: src_track.length,
            })?;
        if destpos > dest_track.length {
            return Err(EditError::InvalidRange {
                pos: destpos,
                len,
                length: dest_track.length,
            });
        }

        let checks = [(src_track, srcpos), (src_track, src_end), (dest_track, destpos)];
        if let Err(error) = checks
            .iter()
            .try_for_each(|(track, pos)| track.check_boundary(&self.segments, *pos))
        {
            warn!(%error, "insert refused");
            return Err(error);
        }

        // At most three splits, and one extra run segment when `destpos`
        // cuts through the source range of a self insert.
        let run_bound = src_track.overlapping(&self.segments, srcpos, src_end).count() + 1;
        let mut run = Vec::new();
        run.try_reserve_exact(run_bound)?;
        self.segments.reserve(3 + run_bound)?;
        if src == dest {
            self.track_mut(src)?.segments.try_reserve(3 + run_bound)?;
        } else {
            self.track_mut(src)?.segments.try_reserve(2)?;
            self.track_mut(dest)?.segments.try_reserve(1 + run_bound)?;
        }

        let Self {
            buffers,
            segments,
            tracks,
            ..
        } = self;
        let src_track = tracks.get_mut(&src).ok_or(EditError::TrackNotFound(src))?;
        src_track.split_at(segments, buffers, srcpos)?;
        src_track.split_at(segments, buffers, src_end)?;
        let dest_track = tracks.get_mut(&dest).ok_or(EditError::TrackNotFound(dest))?;
        dest_track.split_at(segments, buffers, destpos)?;

        let src_track = tracks.get(&src).ok_or(EditError::TrackNotFound(src))?;
        let first = src_track.boundary_index(segments, srcpos);
        let last = src_track.boundary_index(segments, src_end);
        run.extend_from_slice(&src_track.segments[first..last]);

        for id in &mut run {
            let source = *id;
            let segment = &segments[source];
            let alias = Segment {
                alias_of: Some(source),
                ..Segment::new(segment.buffer, segment.offset, segment.length)
            };
            buffers.retain(alias.buffer);
            segments.slot_mut(source).alias_source_count += 1;
            *id = segments.insert(alias);
        }

        let dest_track = tracks.get_mut(&dest).ok_or(EditError::TrackNotFound(dest))?;
        let at = dest_track.boundary_index(segments, destpos);
        let aliases = run.len();
        dest_track.segments.splice(at..at, run);
        dest_track.length += len;

        info!(destpos, srcpos, len, aliases, length = dest_track.length, "range inserted");
        Ok(())
    }

    pub fn identify(&self, target: TrackId, ad: TrackId) -> Result<Vec<Match>, EditError> {
        self.identify_with(target, ad, IdentifyOptions::default())
    }

    #[instrument(skip(self), fields(session_id = %self.id, target = %target, ad = %ad))]
    pub fn identify_with(
        &self,
        target: TrackId,
        ad: TrackId,
        options: IdentifyOptions,
    ) -> Result<Vec<Match>, EditError> {
        let target_samples = self.read(target, 0, self.length(target)?)?;
        let ad_samples = self.read(ad, 0, self.length(ad)?)?;
        let matches = identify::find_matches(&target_samples, &ad_samples, options);
        info!(matches = matches.len(), "identify completed");
        Ok(matches)
    }

    #[instrument(skip(self), fields(session_id = %self.id, track_id = %track_id))]
    pub fn compact(&mut self, track_id: TrackId) -> Result<usize, EditError> {
        let Self {
            buffers,
            segments,
            tracks,
            ..
        } = self;
        let track = tracks
            .get_mut(&track_id)
            .ok_or(EditError::TrackNotFound(track_id))?;
        segments.reserve_removals(track.segments.len())?;
        buffers.reserve_releases(track.segments.len())?;
        let merged = track.compact(segments, buffers);
        debug!(merged, segments = track.segments.len(), "track compacted");
        Ok(merged)
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let (aliased_segments, alias_segments) =
            self.segments
                .iter()
                .fold((0, 0), |(aliased, aliases), (_, segment)| {
                    (
                        aliased + usize::from(segment.is_aliased()),
                        aliases + usize::from(segment.alias_of.is_some()),
                    )
                });
        SessionStats {
            tracks: self.tracks.len(),
            live_buffers: self.buffers.live_count(),
            live_segments: self.segments.live_count(),
            aliased_segments,
            alias_segments,
        }
    }

    pub fn check_invariants(&self) -> Result<(), EditError> {
        let violation = |message: String| Err(EditError::InvariantViolated(message));

        let mut buffer_refs: BTreeMap<BufferId, usize> = BTreeMap::new();
        let mut alias_refs: BTreeMap<SegmentId, usize> = BTreeMap::new();
        let mut owned = 0;

        for (track_id, track) in &self.tracks {
            let mut length = 0;
            for &id in &track.segments {
                let Some(segment) = self.segments.get(id) else {
                    return violation(format!("track {track_id} holds freed segment {id}"));
                };
                let Some(buffer) = self.buffers.get(segment.buffer) else {
                    return violation(format!("segment {id} slices freed {}", segment.buffer));
                };
                if segment.length == 0 || segment.end() > buffer.len() {
                    return violation(format!(
                        "segment {id} spans {}..{} of a {}-sample buffer",
                        segment.offset,
                        segment.end(),
                        buffer.len()
                    ));
                }
                *buffer_refs.entry(segment.buffer).or_default() += 1;
                if let Some(source) = segment.alias_of {
                    *alias_refs.entry(source).or_default() += 1;
                }
                length += segment.length;
                owned += 1;
            }
            if length != track.length {
                return violation(format!(
                    "track {track_id} caches length {} but its segments sum to {length}",
                    track.length
                ));
            }
        }

        if owned != self.segments.live_count() {
            return violation(format!(
                "{} live segments but {owned} are owned by tracks",
                self.segments.live_count()
            ));
        }
        for (id, buffer) in self.buffers.iter() {
            let expected = buffer_refs.get(&id).copied().unwrap_or_default();
            if buffer.refcount() != expected {
                return violation(format!(
                    "{id} has refcount {} but {expected} segment(s) slice it",
                    buffer.refcount()
                ));
            }
        }
        for (id, segment) in self.segments.iter() {
            let expected = alias_refs.get(&id).copied().unwrap_or_default();
            if segment.alias_source_count != expected {
                return violation(format!(
                    "{id} counts {} alias(es) but {expected} point at it",
                    segment.alias_source_count
                ));
            }
        }
        Ok(())
    }

    fn track(&self, track_id: TrackId) -> Result<&Track, EditError> {
        self.tracks
            .get(&track_id)
            .ok_or(EditError::TrackNotFound(track_id))
    }

    fn track_mut(&mut self, track_id: TrackId) -> Result<&mut Track, EditError> {
        self.tracks
            .get_mut(&track_id)
            .ok_or(EditError::TrackNotFound(track_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(samples: &[i16]) -> (Session, TrackId) {
        let mut session = Session::new();
        let track = session
            .load_samples(samples)
            .expect("loading samples should succeed");
        (session, track)
    }

    #[test]
    fn sequential_writes_extend_one_segment() {
        let (mut session, track) = session_with(&[1, 2, 3]);
        session.write(track, 3, &[4, 5]).expect("append should succeed");
        session.write(track, 7, &[9]).expect("gap write should succeed");

        assert_eq!(session.segment_count(track).expect("track exists"), 1);
        assert_eq!(
            session.read(track, 0, 8).expect("read should succeed"),
            vec![1, 2, 3, 4, 5, 0, 0, 9]
        );
        session.check_invariants().expect("invariants should hold");
    }

    #[test]
    fn shared_last_segment_gets_a_fresh_buffer() {
        let (mut session, track) = session_with(&[1, 2]);
        let copy = session.init_track();
        session
            .insert(track, copy, 0, 0, 2)
            .expect("insert should succeed");

        session.write(copy, 2, &[3]).expect("append should succeed");
        assert_eq!(session.segment_count(copy).expect("track exists"), 2);
        assert_eq!(session.read(track, 0, 5).expect("read"), vec![1, 2]);
        assert_eq!(session.read(copy, 0, 5).expect("read"), vec![1, 2, 3]);
        session.check_invariants().expect("invariants should hold");
    }

    #[test]
    fn delete_merges_remaining_pieces() {
        let (mut session, track) = session_with(&[1, 2, 3, 4, 5, 6]);
        let other = session.init_track();
        session.insert(track, other, 0, 2, 2).expect("insert");
        session.delete_range(other, 0, 2).expect("alias delete");
        assert_eq!(session.segment_count(track).expect("track exists"), 3);

        session.delete_range(track, 0, 1).expect("delete");
        assert_eq!(session.segment_count(track).expect("track exists"), 1);
        assert_eq!(session.read(track, 0, 10).expect("read"), vec![2, 3, 4, 5, 6]);
        session.check_invariants().expect("invariants should hold");
    }

    #[test]
    fn deleting_many_segments_releases_each_one() {
        let (mut session, src) = session_with(&[1, 2, 3, 4, 5, 6]);
        let dest = session.init_track();
        for (destpos, srcpos) in [(0, 0), (1, 2), (2, 4)] {
            session
                .insert(src, dest, destpos, srcpos, 1)
                .expect("insert should succeed");
        }
        assert_eq!(session.segment_count(src).expect("track exists"), 6);
        assert_eq!(session.read(dest, 0, 3).expect("read"), vec![1, 3, 5]);

        session.delete_range(dest, 0, 3).expect("alias delete");
        session.delete_range(src, 0, 6).expect("source delete");

        assert_eq!(session.length(src).expect("track exists"), 0);
        let stats = session.stats();
        assert_eq!(stats.live_segments, 0);
        assert_eq!(stats.live_buffers, 0);
        session.check_invariants().expect("invariants should hold");
    }

    #[test]
    fn unknown_track_is_reported() {
        let mut session = Session::new();
        let missing = TrackId::new();
        assert!(matches!(
            session.write(missing, 0, &[1]),
            Err(EditError::TrackNotFound(id)) if id == missing
        ));
        assert!(matches!(
            session.length(missing),
            Err(EditError::TrackNotFound(_))
        ));
    }

    #[test]
    fn destroy_releases_everything() {
        let (mut session, track) = session_with(&[1, 2, 3]);
        let other = session.init_track();
        session.insert(track, other, 0, 1, 1).expect("insert");

        session.destroy_track(other).expect("alias track may go");
        session.destroy_track(track).expect("source is free again");
        assert_eq!(session.stats(), SessionStats::default());
    }
}
