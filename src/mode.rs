// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Video modes and their cached pixel layout.
//!
//! A [`VideoMode`] is an immutable value. The active mode lives in a
//! [`ModeCell`], packed into a single atomic word, so the producer marking a
//! write and the consumer rendering a tile always see one whole mode and
//! never half of a depth switch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::FrameBuffer;
use crate::core::geometry::{SOURCE_HEIGHT, SOURCE_WIDTH};
use crate::error::VideoError;

/// Supported pixel packing densities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-config", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum VideoDepth {
    Bits1 = 1,
    Bits2 = 2,
    Bits4 = 4,
    Bits8 = 8,
}

impl VideoDepth {
    pub const ALL: [VideoDepth; 4] = [Self::Bits1, Self::Bits2, Self::Bits4, Self::Bits8];

    pub const fn bits(self) -> u32 {
        self as u32
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(Self::Bits1),
            2 => Some(Self::Bits2),
            4 => Some(Self::Bits4),
            8 => Some(Self::Bits8),
            _ => None,
        }
    }

    pub const fn pixels_per_byte(self) -> usize {
        8 / self as usize
    }

    /// log2 of [`pixels_per_byte`](Self::pixels_per_byte): pixel `x` lives in byte `x >> shift`.
    pub const fn shift(self) -> u32 {
        match self {
            Self::Bits1 => 3,
            Self::Bits2 => 2,
            Self::Bits4 => 1,
            Self::Bits8 => 0,
        }
    }

    /// Mask selecting one pixel after shifting it to the low bits.
    pub const fn mask(self) -> u8 {
        match self {
            Self::Bits8 => 0xFF,
            _ => (1u8 << self as u8) - 1,
        }
    }

    /// Bytes needed for `width` pixels.
    pub const fn row_bytes(self, width: usize) -> usize {
        (width * self as usize).div_ceil(8)
    }
}

impl fmt::Display for VideoDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bpp", self.bits())
    }
}

/// Layout facts derived from a mode, looked up on every decode and mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub depth: VideoDepth,
    pub bytes_per_row: usize,
    pub pixels_per_byte: usize,
    pub shift: u32,
    pub mask: u8,
}

/// One video mode of the emulated display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub width: usize,
    pub height: usize,
    pub depth: VideoDepth,
    pub bytes_per_row: usize,
}

impl VideoMode {
    /// The full-frame mode at `depth` with tightly packed rows.
    pub const fn with_depth(depth: VideoDepth) -> Self {
        Self {
            width: SOURCE_WIDTH,
            height: SOURCE_HEIGHT,
            depth,
            bytes_per_row: depth.row_bytes(SOURCE_WIDTH),
        }
    }

    pub const fn layout(&self) -> PixelLayout {
        PixelLayout {
            depth: self.depth,
            bytes_per_row: self.bytes_per_row,
            pixels_per_byte: self.depth.pixels_per_byte(),
            shift: self.depth.shift(),
            mask: self.depth.mask(),
        }
    }

    /// Bytes of frame buffer addressed by this mode.
    pub const fn frame_bytes(&self) -> usize {
        self.bytes_per_row * self.height
    }

    /// Check the mode against the fixed geometry and the frame buffer capacity.
    pub fn validate(&self) -> Result<(), VideoError> {
        if self.width != SOURCE_WIDTH || self.height != SOURCE_HEIGHT {
            return Err(VideoError::InvalidMode(format!(
                "{}x{} does not match the fixed {}x{} frame",
                self.width, self.height, SOURCE_WIDTH, SOURCE_HEIGHT
            )));
        }
        let min_row = self.depth.row_bytes(self.width);
        if self.bytes_per_row < min_row {
            return Err(VideoError::InvalidMode(format!(
                "{} bytes per row is too small for {} pixels at {}",
                self.bytes_per_row, self.width, self.depth
            )));
        }
        if self.bytes_per_row > u16::MAX as usize {
            return Err(VideoError::InvalidMode(format!(
                "{} bytes per row is too large",
                self.bytes_per_row
            )));
        }
        if self.frame_bytes() > FrameBuffer::CAPACITY {
            return Err(VideoError::ModeTooLarge {
                needed: self.frame_bytes(),
                capacity: FrameBuffer::CAPACITY,
            });
        }
        Ok(())
    }

    fn pack(&self) -> u64 {
        (self.width as u64 & 0xFFFF)
            | (self.height as u64 & 0xFFFF) << 16
            | (self.depth.bits() as u64) << 32
            | (self.bytes_per_row as u64 & 0xFFFF) << 40
    }

    fn unpack(bits: u64) -> Self {
        Self {
            width: (bits & 0xFFFF) as usize,
            height: ((bits >> 16) & 0xFFFF) as usize,
            // Only validated modes are ever packed.
            depth: VideoDepth::from_bits(((bits >> 32) & 0xFF) as u32).unwrap_or(VideoDepth::Bits8),
            bytes_per_row: ((bits >> 40) & 0xFFFF) as usize,
        }
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ {} ({} bytes/row)",
            self.width, self.height, self.depth, self.bytes_per_row
        )
    }
}

/// The active mode, replaceable in one atomic store.
#[derive(Debug)]
pub struct ModeCell {
    packed: AtomicU64,
}

impl ModeCell {
    pub fn new(mode: VideoMode) -> Self {
        Self {
            packed: AtomicU64::new(mode.pack()),
        }
    }

    pub fn load(&self) -> VideoMode {
        VideoMode::unpack(self.packed.load(Ordering::Acquire))
    }

    /// Replace the mode, returning the previous one.
    pub fn replace(&self, mode: VideoMode) -> VideoMode {
        VideoMode::unpack(self.packed.swap(mode.pack(), Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn layout_per_depth() {
        let expected = [
            (VideoDepth::Bits1, 8, 3, 0x01, 80),
            (VideoDepth::Bits2, 4, 2, 0x03, 160),
            (VideoDepth::Bits4, 2, 1, 0x0F, 320),
            (VideoDepth::Bits8, 1, 0, 0xFF, 640),
        ];
        for (depth, ppb, shift, mask, row) in expected {
            let layout = VideoMode::with_depth(depth).layout();
            assert_eq!(layout.pixels_per_byte, ppb, "{depth}");
            assert_eq!(layout.shift, shift, "{depth}");
            assert_eq!(layout.mask, mask, "{depth}");
            assert_eq!(layout.bytes_per_row, row, "{depth}");
        }
    }

    #[test]
    fn mode_cell_round_trips_every_depth() {
        let cell = ModeCell::new(VideoMode::with_depth(VideoDepth::Bits8));
        for depth in VideoDepth::ALL {
            let mode = VideoMode::with_depth(depth);
            cell.replace(mode);
            assert_eq!(cell.load(), mode);
        }
    }

    #[test]
    fn padded_rows_are_accepted_when_they_fit() {
        let mode = VideoMode {
            bytes_per_row: 96,
            ..VideoMode::with_depth(VideoDepth::Bits1)
        };
        assert!(mode.validate().is_ok());
        assert_eq!(mode.frame_bytes(), 96 * 360);
    }

    #[test]
    fn rejects_wrong_size_and_short_rows() {
        let wrong_size = VideoMode {
            width: 512,
            ..VideoMode::with_depth(VideoDepth::Bits8)
        };
        assert!(matches!(wrong_size.validate(), Err(VideoError::InvalidMode(_))));

        let short_rows = VideoMode {
            bytes_per_row: 79,
            ..VideoMode::with_depth(VideoDepth::Bits1)
        };
        assert!(matches!(short_rows.validate(), Err(VideoError::InvalidMode(_))));

        let too_large = VideoMode {
            bytes_per_row: 700,
            ..VideoMode::with_depth(VideoDepth::Bits8)
        };
        assert!(matches!(too_large.validate(), Err(VideoError::ModeTooLarge { .. })));
    }
}
