// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tile snapshot and render pipeline.
//!
//! For every dirty tile the compositor first copies and decodes the tile's
//! source bytes into a render-local [`TileSnapshot`], then palette-maps and
//! doubles that snapshot into display pixels. The producer may keep writing
//! to the live frame buffer the whole time; rendering only ever reads the
//! snapshot, so a tile never mixes two in-progress writes beyond the short
//! copy window.

use crate::core::FrameBuffer;
use crate::core::geometry::{
    OUTPUT_TILE_PIXELS, OUTPUT_TILE_WIDTH, OUTPUT_WIDTH, PIXEL_SCALE, SOURCE_WIDTH, TILE_PIXELS,
    TILE_WIDTH, tile_rect,
};
use crate::mode::VideoMode;
use crate::palette::{PALETTE_SIZE, PaletteStore, PaletteTable};
use crate::pixel::decode_row;

/// Source pixels converted per inner iteration.
const BATCH: usize = 4;

/// Decoded palette indices of one tile, row-major.
pub struct TileSnapshot {
    pixels: [u8; TILE_PIXELS],
}

impl TileSnapshot {
    pub fn new() -> Self {
        Self {
            pixels: [0; TILE_PIXELS],
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn row(&self, y: usize) -> &[u8] {
        &self.pixels[y * TILE_WIDTH..(y + 1) * TILE_WIDTH]
    }
}

impl Default for TileSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Render-thread state: the local palette copy and scratch buffers.
pub struct FrameCompositor {
    palette: PaletteTable,
    snapshot: TileSnapshot,
    output: Box<[u16]>,
    raw_row: Box<[u8]>,
    index_row: Box<[u8]>,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self {
            palette: [0; PALETTE_SIZE],
            snapshot: TileSnapshot::new(),
            output: vec![0; OUTPUT_TILE_PIXELS].into_boxed_slice(),
            raw_row: vec![0; SOURCE_WIDTH].into_boxed_slice(),
            index_row: vec![0; SOURCE_WIDTH].into_boxed_slice(),
        }
    }

    /// Pull a fresh palette copy if the store changed; returns whether it did.
    pub fn refresh_palette(&mut self, store: &PaletteStore) -> bool {
        store.snapshot_if_changed(&mut self.palette)
    }

    pub fn palette(&self) -> &PaletteTable {
        &self.palette
    }

    pub fn snapshot(&self) -> &TileSnapshot {
        &self.snapshot
    }

    /// Copy and decode tile `index` from the live frame buffer.
    pub fn snapshot_tile(&mut self, fb: &FrameBuffer, mode: &VideoMode, index: usize) {
        let rect = tile_rect(index);
        let layout = mode.layout();
        let first_byte = rect.x >> layout.shift;
        let last_byte = (rect.right() - 1) >> layout.shift;
        let raw = &mut self.raw_row[..=last_byte - first_byte];
        let first_pixel = rect.x & (layout.pixels_per_byte - 1);

        for (y, out) in self.snapshot.pixels.chunks_exact_mut(TILE_WIDTH).enumerate() {
            let row_start = (rect.y + y) * layout.bytes_per_row;
            fb.read_into(row_start + first_byte, raw);
            decode_row(raw, layout.depth, first_pixel, out);
        }
    }

    /// Palette-map and upscale the current snapshot into the tile output buffer.
    pub fn render_tile(&mut self) -> &[u16] {
        for (y, dst) in self
            .output
            .chunks_exact_mut(OUTPUT_TILE_WIDTH * PIXEL_SCALE)
            .enumerate()
        {
            let src = &self.snapshot.pixels[y * TILE_WIDTH..(y + 1) * TILE_WIDTH];
            scale_row(src, &self.palette, dst, OUTPUT_TILE_WIDTH);
        }
        &self.output
    }

    /// Snapshot then render tile `index`; returns its 80×80 display pixels.
    pub fn compose_tile(&mut self, fb: &FrameBuffer, mode: &VideoMode, index: usize) -> &[u16] {
        self.snapshot_tile(fb, mode, index);
        self.render_tile()
    }

    /// Render `rows` full source rows starting at `first_row` into `out`,
    /// which receives `rows * PIXEL_SCALE` panel rows.
    pub fn render_band(
        &mut self,
        fb: &FrameBuffer,
        mode: &VideoMode,
        first_row: usize,
        rows: usize,
        out: &mut [u16],
    ) {
        let layout = mode.layout();
        let row_bytes = layout.depth.row_bytes(mode.width);
        for (i, dst) in out
            .chunks_exact_mut(OUTPUT_WIDTH * PIXEL_SCALE)
            .take(rows)
            .enumerate()
        {
            let raw = &mut self.raw_row[..row_bytes];
            fb.read_into((first_row + i) * layout.bytes_per_row, raw);
            decode_row(raw, layout.depth, 0, &mut self.index_row);
            scale_row(&self.index_row, &self.palette, dst, OUTPUT_WIDTH);
        }
    }

    /// Panel rows produced by a band of `rows` source rows.
    pub const fn band_pixels(rows: usize) -> usize {
        rows * PIXEL_SCALE * OUTPUT_WIDTH
    }
}

impl Default for FrameCompositor {
    fn default() -> Self {
        Self::new()
    }
}

// Expand one row of indices into `PIXEL_SCALE` identical panel rows of
// `out_width` pixels each. `dst` holds exactly those rows.
fn scale_row(src: &[u8], palette: &PaletteTable, dst: &mut [u16], out_width: usize) {
    let (upper, lower) = dst.split_at_mut(out_width);

    let mut chunks = src.chunks_exact(BATCH);
    let mut out = upper.chunks_exact_mut(BATCH * PIXEL_SCALE);
    for (quad, px) in (&mut chunks).zip(&mut out) {
        let c0 = palette[quad[0] as usize];
        let c1 = palette[quad[1] as usize];
        let c2 = palette[quad[2] as usize];
        let c3 = palette[quad[3] as usize];
        px.copy_from_slice(&[c0, c0, c1, c1, c2, c2, c3, c3]);
    }

    let done = src.len() - chunks.remainder().len();
    for (i, &index) in chunks.remainder().iter().enumerate() {
        let color = palette[index as usize];
        let x = (done + i) * PIXEL_SCALE;
        upper[x..x + PIXEL_SCALE].fill(color);
    }

    lower.copy_from_slice(upper);
}
