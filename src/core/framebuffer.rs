// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::VideoError;

/// Emulated frame buffer shared between the producer and the render thread.
///
/// Each byte is a relaxed atomic cell: the producer and the consumer are
/// allowed to race on individual bytes, and the per-tile snapshot taken by
/// the compositor is what keeps a rendered tile coherent. Relaxed byte
/// loads and stores compile to plain memory accesses.
pub struct FrameBuffer {
    cells: Box<[AtomicU8]>,
}

impl FrameBuffer {
    /// Largest frame the geometry can address: 640×360 at 8 bits per pixel.
    pub const CAPACITY: usize = crate::core::geometry::SOURCE_WIDTH
        * crate::core::geometry::SOURCE_HEIGHT;

    /// Allocate a buffer of `size` bytes, every byte set to `fill`.
    pub fn new(size: usize, fill: u8) -> Result<Self, VideoError> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(size)
            .map_err(|_| VideoError::AllocationFailed {
                what: "frame buffer",
                bytes: size,
            })?;
        cells.extend((0..size).map(|_| AtomicU8::new(fill)));
        Ok(Self {
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read a byte; out-of-range reads return 0.
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.cells
            .get(offset)
            .map(|cell| cell.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Write a byte; out-of-range writes are dropped.
    pub fn write_u8(&self, offset: usize, value: u8) {
        if let Some(cell) = self.cells.get(offset) {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Write a big-endian word, the emulated machine's byte order.
    pub fn write_u16(&self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_be_bytes());
    }

    /// Write a big-endian long.
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_be_bytes());
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.read_u8(offset), self.read_u8(offset + 1)])
    }

    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        let Some(cells) = self.cells.get(offset..) else {
            return;
        };
        for (cell, &byte) in cells.iter().zip(data) {
            cell.store(byte, Ordering::Relaxed);
        }
    }

    /// Fill the whole buffer with `value`.
    pub fn fill(&self, value: u8) {
        for cell in self.cells.iter() {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    ///
    /// Bytes past the end of the buffer read as 0.
    pub fn read_into(&self, offset: usize, out: &mut [u8]) {
        let available = self.cells.get(offset..).unwrap_or(&[]);
        let copied = available.len().min(out.len());
        for (slot, cell) in out[..copied].iter_mut().zip(available) {
            *slot = cell.load(Ordering::Relaxed);
        }
        out[copied..].fill(0);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_filled() {
        let fb = FrameBuffer::new(64, 0x80).unwrap();
        assert_eq!(fb.len(), 64);
        assert_eq!(fb.read_u8(0), 0x80);
        assert_eq!(fb.read_u8(63), 0x80);
    }

    #[test]
    fn read_write_u8() {
        let fb = FrameBuffer::new(16, 0).unwrap();
        fb.write_u8(3, 0x12);
        assert_eq!(fb.read_u8(3), 0x12);
        // out of range
        fb.write_u8(16, 0x34);
        assert_eq!(fb.read_u8(16), 0);
    }

    #[test]
    fn words_are_big_endian() {
        let fb = FrameBuffer::new(16, 0).unwrap();
        fb.write_u16(0, 0x1234);
        assert_eq!(fb.read_u8(0), 0x12);
        assert_eq!(fb.read_u8(1), 0x34);
        assert_eq!(fb.read_u16(0), 0x1234);

        fb.write_u32(4, 0xAABB_CCDD);
        assert_eq!(fb.read_u8(4), 0xAA);
        assert_eq!(fb.read_u8(7), 0xDD);
    }

    #[test]
    fn writes_clip_at_the_end() {
        let fb = FrameBuffer::new(4, 0).unwrap();
        fb.write_u32(2, 0x0102_0304);
        let mut out = [0xFF; 6];
        fb.read_into(0, &mut out);
        assert_eq!(out, [0, 0, 0x01, 0x02, 0, 0]);
    }

    #[test]
    fn read_into_past_end_is_zeroed() {
        let fb = FrameBuffer::new(4, 7).unwrap();
        let mut out = [0xFF; 3];
        fb.read_into(10, &mut out);
        assert_eq!(out, [0, 0, 0]);
    }
}
