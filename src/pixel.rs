// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Packed pixel decoding.
//!
//! Frame buffer rows hold 1, 2, 4 or 8 bits per pixel, most significant
//! bits first. Everything here is stateless and callable from either side.

use crate::mode::VideoDepth;

/// Palette index of pixel `slot` within `byte` (slot 0 is the leftmost pixel).
#[inline]
pub fn pixel_in_byte(byte: u8, slot: usize, depth: VideoDepth) -> u8 {
    let bits = depth.bits();
    let shift = 8 - bits * (slot as u32 + 1);
    (byte >> shift) & depth.mask()
}

/// Palette index of pixel `x` in a packed row.
///
/// Pixels past the end of `row` decode as 0.
#[inline]
pub fn decode_pixel(row: &[u8], x: usize, depth: VideoDepth) -> u8 {
    let byte = row.get(x >> depth.shift()).copied().unwrap_or(0);
    pixel_in_byte(byte, x & (depth.pixels_per_byte() - 1), depth)
}

/// Decode `out.len()` pixels starting at pixel `first_pixel` of `row`.
pub fn decode_row(row: &[u8], depth: VideoDepth, first_pixel: usize, out: &mut [u8]) {
    match depth {
        VideoDepth::Bits8 => {
            let src = row.get(first_pixel..).unwrap_or(&[]);
            let copied = src.len().min(out.len());
            out[..copied].copy_from_slice(&src[..copied]);
            out[copied..].fill(0);
        }
        _ if first_pixel & (depth.pixels_per_byte() - 1) == 0 => {
            decode_aligned(row.get(first_pixel >> depth.shift()..).unwrap_or(&[]), depth, out)
        }
        _ => {
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = decode_pixel(row, first_pixel + i, depth);
            }
        }
    }
}

// Whole bytes at a time; the common case since tiles start on byte boundaries.
fn decode_aligned(bytes: &[u8], depth: VideoDepth, out: &mut [u8]) {
    let ppb = depth.pixels_per_byte();
    let mut chunks = out.chunks_mut(ppb);
    for (&byte, chunk) in bytes.iter().zip(&mut chunks) {
        for (slot, pixel) in chunk.iter_mut().enumerate() {
            *pixel = pixel_in_byte(byte, slot, depth);
        }
    }
    for chunk in chunks {
        chunk.fill(0);
    }
}

/// Convert an RGB888 color to the panel's RGB565.
#[inline]
pub const fn rgb888_to_rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}
