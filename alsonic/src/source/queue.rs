//! Buffer queues of a source.
//!
//! Entries drain from the front of `active` and move to the back of `inactive` once
//! consumed. `temp` holds entries queued while the source is mid-transition; they
//! join `active` when the matching message is applied in post-render.
//!
//! Every deque keeps enough capacity for all entries of the source (see
//! [`SourceQueues::reserve_all`]), so moving entries around on the render thread
//! never allocates.

use crate::buffer::{BufferId, PcmData};
use crate::convert::{ConverterCache, ConverterId};
use crate::format::AudioFormat;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedState {
    Pending,
    InProgress,
    Processed,
}

/// Result of pulling PCM out of one queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// This many frames were written
    Frames(usize),
    /// The entry has no frames left
    EndOfBuffer,
    /// The entry cannot produce data (missing converter)
    Starved,
}

#[derive(Debug)]
pub struct QueueEntry {
    buffer: BufferId,
    pcm: Arc<PcmData>,
    byte_offset: usize,
    state: ProcessedState,
    converter: ConverterId,
}

impl QueueEntry {
    pub fn new(buffer: BufferId, pcm: Arc<PcmData>, converter: ConverterId) -> Self {
        Self {
            buffer,
            pcm,
            byte_offset: 0,
            state: ProcessedState::Pending,
            converter,
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn state(&self) -> ProcessedState {
        self.state
    }

    pub fn format(&self) -> AudioFormat {
        self.pcm.format()
    }

    pub fn frames(&self) -> usize {
        self.pcm.frames()
    }

    pub fn frame_offset(&self) -> usize {
        self.pcm.format().frames_in(self.byte_offset)
    }

    /// Every frame has been pulled
    pub fn is_exhausted(&self) -> bool {
        self.byte_offset >= self.pcm.byte_len()
    }

    fn reset(&mut self) {
        self.byte_offset = 0;
        self.state = ProcessedState::Pending;
    }

    fn finish(&mut self) {
        self.byte_offset = self.pcm.byte_len();
        self.state = ProcessedState::Processed;
    }

    fn seek(&mut self, frame: usize) {
        let frame = frame.min(self.frames());
        self.byte_offset = frame * self.pcm.format().bytes_per_frame();
        self.state = if frame == 0 {
            ProcessedState::Pending
        } else {
            ProcessedState::InProgress
        };
    }

    /// Decode up to `out.len() / channels` frames into `out`.
    pub fn pull(&mut self, converters: &ConverterCache, out: &mut [f32]) -> PullOutcome {
        let end = self.pcm.byte_len();
        if self.byte_offset >= end {
            return PullOutcome::EndOfBuffer;
        }
        let format = self.pcm.format();
        let input = &self.pcm.bytes()[self.byte_offset..end];
        let frames = converters.convert(self.converter, format.channels, input, out);
        if frames == 0 {
            return if out.is_empty() {
                PullOutcome::Frames(0)
            } else {
                PullOutcome::Starved
            };
        }
        self.byte_offset += frames * format.bytes_per_frame();
        self.state = ProcessedState::InProgress;
        PullOutcome::Frames(frames)
    }
}

/// FIFO of queue entries
#[derive(Debug, Default)]
pub struct BufferQueue {
    entries: VecDeque<QueueEntry>,
}

impl BufferQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut QueueEntry> {
        self.entries.front_mut()
    }

    pub fn push_back(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    fn reserve_total(&mut self, total: usize) {
        self.entries.reserve(total.saturating_sub(self.entries.len()));
    }

    fn total_frames(&self) -> usize {
        self.entries.iter().map(QueueEntry::frames).sum()
    }
}

/// The active, inactive and temp queues of one source.
#[derive(Debug, Default)]
pub struct SourceQueues {
    pub active: BufferQueue,
    pub inactive: BufferQueue,
    pub temp: BufferQueue,
    /// Processed entries unqueued by the API whose removal waits for post-render
    pub pending_clear: usize,
    /// Deferred `set_buffer` calls not yet applied
    pub pending_replacements: usize,
    /// Index in `temp` where the entries of the latest deferred `set_buffer` start
    pub replace_from: usize,
}

impl SourceQueues {
    /// Queue length as seen by the API
    pub fn reported_len(&self) -> usize {
        if self.is_replacing() {
            self.temp.len().saturating_sub(self.replace_from)
        } else {
            (self.active.len() + self.inactive.len() + self.temp.len())
                .saturating_sub(self.pending_clear)
        }
    }

    /// Entries consumed and not yet unqueued
    pub fn processed_len(&self) -> usize {
        if self.is_replacing() {
            0
        } else {
            self.inactive.len().saturating_sub(self.pending_clear)
        }
    }

    /// A deferred `set_buffer` is waiting for post-render
    pub fn is_replacing(&self) -> bool {
        self.pending_replacements > 0
    }

    /// Stage a replacement: entries pushed to `temp` from now on form the new queue
    pub fn begin_replacement(&mut self) {
        self.pending_replacements += 1;
        self.replace_from = self.temp.len();
    }

    /// No entries in the active and inactive queues
    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty()
    }

    /// Converters referenced by any entry, including staged ones
    pub fn converters_in_use(&self) -> Vec<ConverterId> {
        let mut used = Vec::new();
        for entry in self.active.iter().chain(self.inactive.iter()).chain(self.temp.iter()) {
            if !used.contains(&entry.converter) {
                used.push(entry.converter);
            }
        }
        used
    }

    /// Make sure later moves between queues never allocate. API side only.
    pub fn reserve_all(&mut self) {
        let total = self.active.len() + self.inactive.len() + self.temp.len();
        self.active.reserve_total(total);
        self.inactive.reserve_total(total);
        self.temp.reserve_total(total);
    }

    /// Format shared by every entry of the queue once pending work is applied
    pub fn future_format(&self) -> Option<AudioFormat> {
        let first = if self.is_replacing() {
            self.temp.iter().nth(self.replace_from)
        } else {
            self.inactive
                .front()
                .or_else(|| self.active.front())
                .or_else(|| self.temp.front())
        };
        first.map(QueueEntry::format)
    }

    /// Format of the entries the render thread is draining now
    pub fn current_format(&self) -> Option<AudioFormat> {
        self.inactive
            .front()
            .or_else(|| self.active.front())
            .map(QueueEntry::format)
    }

    /// Ids of the inactive then active entries
    pub fn combined_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.inactive
            .iter()
            .chain(self.active.iter())
            .map(QueueEntry::buffer)
    }

    /// Ids of entries that still hold a buffer attachment, in play order.
    ///
    /// Entries already unqueued or replaced by the API are skipped even while
    /// they wait for post-render to remove them.
    pub fn attached_ids(&self) -> Vec<BufferId> {
        if self.is_replacing() {
            return self
                .temp
                .iter()
                .skip(self.replace_from)
                .map(QueueEntry::buffer)
                .collect();
        }
        self.combined_ids()
            .skip(self.pending_clear)
            .chain(self.temp.iter().map(QueueEntry::buffer))
            .collect()
    }

    /// Move the front active entry to the inactive queue
    pub fn advance(&mut self) -> Option<BufferId> {
        let mut entry = self.active.pop_front()?;
        entry.finish();
        let id = entry.buffer();
        self.inactive.push_back(entry);
        Some(id)
    }

    /// Start the queue over: every entry back to active, unplayed
    pub fn rewind(&mut self) {
        while let Some(entry) = self.inactive.entries.pop_back() {
            self.active.entries.push_front(entry);
        }
        self.active.entries.iter_mut().for_each(QueueEntry::reset);
    }

    /// Loop: the consumed queue becomes the active one again
    pub fn swap_for_loop(&mut self) {
        std::mem::swap(&mut self.active, &mut self.inactive);
        self.active.entries.iter_mut().for_each(QueueEntry::reset);
    }

    /// Everything queued counts as processed (stop)
    pub fn mark_all_processed(&mut self) {
        while self.advance().is_some() {}
    }

    /// Remove the first `count` entries of the combined queue, consumed ones first
    pub fn remove_front(&mut self, count: usize) -> usize {
        let mut removed = 0;
        while removed < count {
            if self.inactive.pop_front().is_none() && self.active.pop_front().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    /// Drop the active and inactive entries and promote the first `staged` temp entries
    pub fn replace_with_staged(&mut self, staged: usize) {
        self.active.entries.clear();
        self.inactive.entries.clear();
        self.promote_staged(staged);
        self.pending_replacements = self.pending_replacements.saturating_sub(1);
        self.pending_clear = 0;
    }

    /// Move up to `count` temp entries to the end of the active queue
    pub fn promote_staged(&mut self, count: usize) {
        let mut moved = 0;
        while moved < count {
            match self.temp.pop_front() {
                Some(entry) => self.active.push_back(entry),
                None => break,
            }
            moved += 1;
        }
        self.replace_from = self.replace_from.saturating_sub(moved);
    }

    pub fn clear(&mut self) {
        self.active.entries.clear();
        self.inactive.entries.clear();
        self.temp.entries.clear();
        self.pending_clear = 0;
        self.pending_replacements = 0;
        self.replace_from = 0;
    }

    pub fn total_frames(&self) -> usize {
        self.inactive.total_frames() + self.active.total_frames()
    }

    /// Frames played so far in the current pass over the queue
    pub fn position_frames(&self) -> usize {
        self.inactive.total_frames() + self.active.front().map_or(0, QueueEntry::frame_offset)
    }

    /// Rewind and skip forward to `frame`. Returns false when `frame` is past the end.
    pub fn seek(&mut self, frame: usize) -> bool {
        if frame >= self.total_frames() {
            return false;
        }
        self.rewind();
        let mut remaining = frame;
        while let Some(front) = self.active.front() {
            if remaining < front.frames() {
                break;
            }
            remaining -= front.frames();
            self.advance();
        }
        if let Some(front) = self.active.front_mut() {
            front.seek(remaining);
        }
        true
    }
}
