// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Fixed display geometry.
//!
//! The logical frame is 640×360 source pixels, split into a 16×9 grid of
//! 40×40 tiles and doubled in both axes onto a 1280×720 panel. Every
//! constant here is checked against the others at compile time, so a grid
//! that does not cover the frame exactly fails to build.

/// Logical (emulated) frame width in pixels.
pub const SOURCE_WIDTH: usize = 640;
/// Logical (emulated) frame height in pixels.
pub const SOURCE_HEIGHT: usize = 360;

/// Tile edge in source pixels.
pub const TILE_WIDTH: usize = 40;
pub const TILE_HEIGHT: usize = 40;

pub const TILES_X: usize = 16;
pub const TILES_Y: usize = 9;
pub const TILE_COUNT: usize = TILES_X * TILES_Y;

/// Source pixels in one tile.
pub const TILE_PIXELS: usize = TILE_WIDTH * TILE_HEIGHT;

/// Integer upscale applied in both axes.
pub const PIXEL_SCALE: usize = 2;

pub const OUTPUT_WIDTH: usize = SOURCE_WIDTH * PIXEL_SCALE;
pub const OUTPUT_HEIGHT: usize = SOURCE_HEIGHT * PIXEL_SCALE;
pub const OUTPUT_TILE_WIDTH: usize = TILE_WIDTH * PIXEL_SCALE;
pub const OUTPUT_TILE_HEIGHT: usize = TILE_HEIGHT * PIXEL_SCALE;

/// Display pixels produced for one tile.
pub const OUTPUT_TILE_PIXELS: usize = OUTPUT_TILE_WIDTH * OUTPUT_TILE_HEIGHT;

const _: () = assert!(TILES_X * TILE_WIDTH == SOURCE_WIDTH);
const _: () = assert!(TILES_Y * TILE_HEIGHT == SOURCE_HEIGHT);
const _: () = assert!(OUTPUT_WIDTH == 1280 && OUTPUT_HEIGHT == 720);
// A 1bpp byte holds 8 pixels; tiles must start on a byte boundary at every depth.
const _: () = assert!(TILE_WIDTH % 8 == 0);

/// Axis-aligned rectangle in either source or output pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileRect {
    /// Exclusive right edge.
    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub const fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// The same rectangle on the upscaled panel.
    pub const fn scaled(self) -> Self {
        Self {
            x: self.x * PIXEL_SCALE,
            y: self.y * PIXEL_SCALE,
            width: self.width * PIXEL_SCALE,
            height: self.height * PIXEL_SCALE,
        }
    }
}

/// Linear tile index for grid coordinates, row-major.
pub const fn tile_index(tile_x: usize, tile_y: usize) -> usize {
    tile_y * TILES_X + tile_x
}

/// Grid coordinates for a linear tile index.
pub const fn tile_coords(index: usize) -> (usize, usize) {
    (index % TILES_X, index / TILES_X)
}

/// Source-space rectangle covered by tile `index`.
pub const fn tile_rect(index: usize) -> TileRect {
    let (tx, ty) = tile_coords(index);
    TileRect {
        x: tx * TILE_WIDTH,
        y: ty * TILE_HEIGHT,
        width: TILE_WIDTH,
        height: TILE_HEIGHT,
    }
}

/// Tile containing source pixel (`x`, `y`).
pub const fn tile_at(x: usize, y: usize) -> usize {
    tile_index(x / TILE_WIDTH, y / TILE_HEIGHT)
}
