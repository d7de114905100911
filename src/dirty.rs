// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Write-time dirty tile tracking.
//!
//! The producer calls [`DirtyTileTracker::mark_dirty_at_offset`] or
//! [`DirtyTileTracker::mark_dirty_range`] right after every frame buffer
//! write. The byte offset is mapped, through the current [`VideoMode`], to
//! the tiles whose pixels it covers and those bits are OR-ed into an atomic
//! accumulator. Once per cycle the render thread swaps each accumulator word
//! with zero into its own [`DirtySnapshot`].
//!
//! Over-marking is allowed; losing a mark is not. A bit only leaves the
//! accumulator through the swap, so every mark lands in exactly one snapshot.

use std::sync::atomic::{AtomicU32, Ordering};

use bitvec::prelude::*;

use crate::core::geometry::{TILE_COUNT, TILE_HEIGHT, TILE_WIDTH, TILES_X};
use crate::mode::VideoMode;

/// Words backing one generation of the bitmap.
pub const DIRTY_WORDS: usize = TILE_COUNT.div_ceil(32);

/// Writes up to this many bytes within one row take the boundary-only path.
const SMALL_WRITE_BYTES: usize = 4;

type TileBits = BitArray<[u32; DIRTY_WORDS], Lsb0>;

/// Producer-side accumulator of dirty tiles.
pub struct DirtyTileTracker {
    words: [AtomicU32; DIRTY_WORDS],
}

impl DirtyTileTracker {
    pub fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Mark the tile(s) covering the pixels of the byte at `offset`.
    ///
    /// Offsets outside the active frame, or inside row padding, are ignored.
    pub fn mark_dirty_at_offset(&self, offset: usize, mode: &VideoMode) {
        if offset >= mode.frame_bytes() {
            return;
        }
        if let Some((row, first_x, last_x)) = byte_pixels(offset, mode) {
            self.mark_row_span(row / TILE_HEIGHT, first_x / TILE_WIDTH, last_x / TILE_WIDTH);
        }
    }

    /// Mark every tile touched by `size` bytes written at `offset`.
    ///
    /// Writes confined to one row mark the tile columns between their first
    /// and last byte. Writes crossing rows mark every tile column of every
    /// tile row they touch.
    pub fn mark_dirty_range(&self, offset: usize, size: usize, mode: &VideoMode) {
        let frame_bytes = mode.frame_bytes();
        if size == 0 || offset >= frame_bytes {
            return;
        }
        let last = offset.saturating_add(size - 1).min(frame_bytes - 1);
        let first_row = offset / mode.bytes_per_row;
        let last_row = last / mode.bytes_per_row;

        if first_row == last_row {
            if size <= SMALL_WRITE_BYTES {
                self.mark_dirty_at_offset(offset, mode);
                self.mark_dirty_at_offset(last, mode);
                return;
            }
            let Some((row, first_x, _)) = byte_pixels(offset, mode) else {
                return;
            };
            // The tail byte may sit in row padding; clamp to the last pixel.
            let last_x = byte_pixels(last, mode).map_or(mode.width - 1, |(_, _, x)| x);
            self.mark_row_span(row / TILE_HEIGHT, first_x / TILE_WIDTH, last_x / TILE_WIDTH);
            return;
        }

        let first_tile = (first_row / TILE_HEIGHT) * TILES_X;
        let last_tile = (last_row / TILE_HEIGHT) * TILES_X + TILES_X - 1;
        self.mark_run(first_tile, last_tile);
    }

    /// Mark one tile by linear index.
    pub fn mark_tile(&self, index: usize) {
        if index < TILE_COUNT {
            self.words[index / 32].fetch_or(1 << (index % 32), Ordering::Release);
        }
    }

    /// Mark every tile, e.g. for a forced full repaint.
    pub fn mark_all(&self) {
        self.mark_run(0, TILE_COUNT - 1);
    }

    /// Swap the accumulator with zero into `snapshot` and return the number
    /// of dirty tiles.
    ///
    /// Render thread only; callers must not run two collections at once.
    pub fn collect_and_clear(&self, snapshot: &mut DirtySnapshot) -> usize {
        for (word, slot) in self.words.iter().zip(snapshot.bits.data.iter_mut()) {
            *slot = word.swap(0, Ordering::AcqRel);
        }
        snapshot.count()
    }

    /// OR a snapshot back into the accumulator, for tiles whose push failed.
    pub fn restore(&self, snapshot: &DirtySnapshot) {
        for (word, &bits) in self.words.iter().zip(snapshot.bits.data.iter()) {
            if bits != 0 {
                word.fetch_or(bits, Ordering::Release);
            }
        }
    }

    pub fn is_marked(&self, index: usize) -> bool {
        index < TILE_COUNT && self.words[index / 32].load(Ordering::Acquire) & (1 << (index % 32)) != 0
    }

    /// Tiles currently marked in the accumulator.
    pub fn pending(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    fn mark_row_span(&self, tile_row: usize, first_col: usize, last_col: usize) {
        let base = tile_row * TILES_X;
        self.mark_run(base + first_col, base + last_col.min(TILES_X - 1));
    }

    // OR in the contiguous tile run `first..=last`, one fetch_or per word.
    fn mark_run(&self, first: usize, last: usize) {
        let last = last.min(TILE_COUNT - 1);
        let mut index = first;
        while index <= last {
            let bit = index % 32;
            let span = (last - index + 1).min(32 - bit);
            let mask = if span == 32 {
                u32::MAX
            } else {
                ((1u32 << span) - 1) << bit
            };
            self.words[index / 32].fetch_or(mask, Ordering::Release);
            index += span;
        }
    }
}

impl Default for DirtyTileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Source row and first/last pixel covered by the byte at `offset`, or
/// `None` if the byte is row padding.
fn byte_pixels(offset: usize, mode: &VideoMode) -> Option<(usize, usize, usize)> {
    let layout = mode.layout();
    let row = offset / layout.bytes_per_row;
    let first_x = (offset % layout.bytes_per_row) << layout.shift;
    if first_x >= mode.width {
        return None;
    }
    let last_x = (first_x + layout.pixels_per_byte - 1).min(mode.width - 1);
    Some((row, first_x, last_x))
}

/// Render-side copy of one dirty generation.
#[derive(Clone, PartialEq, Eq)]
pub struct DirtySnapshot {
    bits: TileBits,
}

impl DirtySnapshot {
    pub fn new() -> Self {
        Self {
            bits: BitArray::new([0; DIRTY_WORDS]),
        }
    }

    pub fn count(&self) -> usize {
        self.bits[..TILE_COUNT].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn is_dirty(&self, index: usize) -> bool {
        index < TILE_COUNT && self.bits[index]
    }

    pub fn set(&mut self, index: usize) {
        if index < TILE_COUNT {
            self.bits.set(index, true);
        }
    }

    /// Mark every tile of the grid.
    pub fn set_all(&mut self) {
        self.bits[..TILE_COUNT].fill(true);
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    /// Dirty tile indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits[..TILE_COUNT].iter_ones()
    }
}

impl Default for DirtySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DirtySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
