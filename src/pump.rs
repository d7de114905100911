// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Moving composited pixels to the display.
//!
//! Two strategies:
//!
//! - **Tile-direct**: one window + write per dirty tile.
//! - **Full-stream**: the whole frame in row bands through two alternating
//!   buffers, rendering band *n + 1* while band *n* is in flight.
//!
//! Both feed the [`Watchdog`] at bounded intervals during long updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use log::trace;

use crate::compositor::FrameCompositor;
use crate::core::FrameBuffer;
use crate::core::geometry::{OUTPUT_HEIGHT, OUTPUT_WIDTH, SOURCE_HEIGHT, TILE_COUNT, tile_rect};
use crate::dirty::DirtySnapshot;
use crate::display::{Batch, DisplayController};
use crate::error::{DisplayError, TransferError, VideoError};
use crate::mode::VideoMode;

/// Supervisory liveness signal fed during long updates.
pub trait Watchdog {
    fn feed(&self);
}

/// Watchdog that ignores feeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&self) {}
}

/// Watchdog that counts feeds.
#[derive(Debug, Default)]
pub struct FeedCounter {
    feeds: AtomicU64,
}

impl FeedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

impl Watchdog for FeedCounter {
    fn feed(&self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}

impl<W: Watchdog + ?Sized> Watchdog for Arc<W> {
    fn feed(&self) {
        (**self).feed()
    }
}

impl<W: Watchdog + ?Sized> Watchdog for &W {
    fn feed(&self) {
        (**self).feed()
    }
}

/// Transfer strategy for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    TileDirect,
    FullStream,
}

impl PushMode {
    /// Pick a strategy for `dirty` tiles given a threshold in percent.
    ///
    /// Full-stream is chosen once the dirty fraction reaches the threshold;
    /// any threshold above 100 always selects tile-direct.
    pub fn select(dirty: usize, threshold_percent: u32) -> Self {
        if threshold_percent > 100 {
            return Self::TileDirect;
        }
        if dirty * 100 >= threshold_percent as usize * TILE_COUNT {
            Self::FullStream
        } else {
            Self::TileDirect
        }
    }
}

/// Pushes compositor output to a [`DisplayController`].
///
/// Owns the two full-stream band buffers. Between pushes both sit in
/// `buffers`; during a push at most one is lent to the controller.
pub struct DisplayPump {
    band_rows: usize,
    feed_every_tiles: usize,
    buffers: [Option<Vec<u16>>; 2],
}

impl DisplayPump {
    /// `band_rows` source rows per full-stream band; feed the watchdog every
    /// `feed_every_tiles` tiles in tile mode.
    ///
    /// Both band buffers are allocated here. Pushing never allocates.
    pub fn new(band_rows: usize, feed_every_tiles: usize) -> Result<Self, VideoError> {
        let band_rows = band_rows.max(1);
        let band_len = FrameCompositor::band_pixels(band_rows);
        Ok(Self {
            band_rows,
            feed_every_tiles: feed_every_tiles.max(1),
            buffers: [Some(band_buffer(band_len)?), Some(band_buffer(band_len)?)],
        })
    }

    /// Push every tile set in `dirty`. Returns the number of tiles written.
    pub fn push_tiles<D, W>(
        &mut self,
        compositor: &mut FrameCompositor,
        fb: &FrameBuffer,
        mode: &VideoMode,
        dirty: &DirtySnapshot,
        display: &mut D,
        watchdog: &W,
    ) -> Result<usize, DisplayError>
    where
        D: DisplayController + ?Sized,
        W: Watchdog + ?Sized,
    {
        let mut batch = Batch::begin(display)?;
        let mut pushed = 0;
        for index in dirty.iter() {
            let pixels = compositor.compose_tile(fb, mode, index);
            let rect = tile_rect(index).scaled();
            batch.set_window(rect.x, rect.y, rect.width, rect.height)?;
            batch.write_pixels(pixels)?;
            pushed += 1;
            if pushed % self.feed_every_tiles == 0 {
                watchdog.feed();
                thread::yield_now();
            }
        }
        batch.finish()?;
        watchdog.feed();
        trace!("pushed {pushed} tiles");
        Ok(pushed)
    }

    /// Push the whole frame in double-buffered bands. Returns the number of
    /// bands written.
    pub fn push_full_stream<D, W>(
        &mut self,
        compositor: &mut FrameCompositor,
        fb: &FrameBuffer,
        mode: &VideoMode,
        display: &mut D,
        watchdog: &W,
    ) -> Result<usize, DisplayError>
    where
        D: DisplayController + ?Sized,
        W: Watchdog + ?Sized,
    {
        let mut batch = Batch::begin(display)?;
        let result = self.stream_bands(compositor, fb, mode, &mut *batch, watchdog);
        // Never leave a transfer running past this call, even on error.
        let drained = match batch.wait_transfer_complete() {
            Ok(Some(buffer)) => {
                self.park(buffer);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => Err(self.reclaim(err)),
        };
        let bands = result?;
        drained?;
        batch.finish()?;
        watchdog.feed();
        trace!("streamed {bands} bands");
        Ok(bands)
    }

    fn stream_bands<D, W>(
        &mut self,
        compositor: &mut FrameCompositor,
        fb: &FrameBuffer,
        mode: &VideoMode,
        display: &mut D,
        watchdog: &W,
    ) -> Result<usize, DisplayError>
    where
        D: DisplayController + ?Sized,
        W: Watchdog + ?Sized,
    {
        display.set_window(0, 0, OUTPUT_WIDTH, OUTPUT_HEIGHT)?;
        let mut current = 0;
        let mut bands = 0;

        let mut first_row = 0;
        while first_row < SOURCE_HEIGHT {
            let rows = self.band_rows.min(SOURCE_HEIGHT - first_row);
            let Some(mut buffer) = self.buffers[current].take() else {
                return Err(DisplayError::TransferFailed(
                    "band buffer was not returned by the controller".into(),
                ));
            };
            // Shrinking or regrowing within the original capacity.
            buffer.resize(FrameCompositor::band_pixels(rows), 0);
            // Overlaps with the transfer of the other buffer.
            compositor.render_band(fb, mode, first_row, rows, &mut buffer);

            match display.wait_transfer_complete() {
                Ok(Some(previous)) => self.buffers[current ^ 1] = Some(previous),
                Ok(None) => {}
                Err(err) => {
                    self.buffers[current] = Some(buffer);
                    return Err(self.reclaim(err));
                }
            }
            if let Err(err) = display.write_pixels_async(buffer) {
                return Err(self.reclaim(err));
            }

            current ^= 1;
            bands += 1;
            first_row += rows;
            if bands % 16 == 0 {
                watchdog.feed();
                thread::yield_now();
            }
        }
        Ok(bands)
    }

    // Return a completed buffer to whichever slot is free.
    fn park(&mut self, buffer: Vec<u16>) {
        if let Some(slot) = self.buffers.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(buffer);
        }
    }

    // Keep the buffer of a failed transfer and pass the error on.
    fn reclaim(&mut self, err: TransferError) -> DisplayError {
        let (error, buffer) = err.into_parts();
        self.park(buffer);
        error
    }
}

fn band_buffer(len: usize) -> Result<Vec<u16>, VideoError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| VideoError::AllocationFailed {
            what: "band buffer",
            bytes: len.saturating_mul(std::mem::size_of::<u16>()),
        })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::{OUTPUT_TILE_PIXELS, tile_index};
    use crate::display::{DisplayOp, MemoryDisplay};
    use crate::mode::VideoDepth;
    use crate::palette::PaletteStore;
    use pretty_assertions::assert_eq;

    fn setup() -> (FrameBuffer, VideoMode, FrameCompositor) {
        let mode = VideoMode::with_depth(VideoDepth::Bits8);
        let fb = FrameBuffer::new(mode.frame_bytes(), 0).unwrap();
        let mut compositor = FrameCompositor::new();
        compositor.refresh_palette(&PaletteStore::new());
        (fb, mode, compositor)
    }

    #[test]
    fn select_honours_threshold() {
        assert_eq!(PushMode::select(TILE_COUNT, 101), PushMode::TileDirect);
        assert_eq!(PushMode::select(72, 50), PushMode::FullStream);
        assert_eq!(PushMode::select(71, 50), PushMode::TileDirect);
        assert_eq!(PushMode::select(0, 0), PushMode::FullStream);
    }

    #[test]
    fn tile_push_writes_one_window_per_tile() {
        let (fb, mode, mut compositor) = setup();
        let mut dirty = DirtySnapshot::new();
        dirty.set(tile_index(1, 0));
        dirty.set(tile_index(0, 2));
        let mut display = MemoryDisplay::new();
        let watchdog = FeedCounter::new();

        let mut pump = DisplayPump::new(4, 16).unwrap();
        let pushed = pump
            .push_tiles(&mut compositor, &fb, &mode, &dirty, &mut display, &watchdog)
            .unwrap();

        assert_eq!(pushed, 2);
        assert_eq!(
            display.ops(),
            &[
                DisplayOp::BeginBatch,
                DisplayOp::SetWindow { x: 80, y: 0, width: 80, height: 80 },
                DisplayOp::Write { pixels: OUTPUT_TILE_PIXELS },
                DisplayOp::SetWindow { x: 0, y: 160, width: 80, height: 80 },
                DisplayOp::Write { pixels: OUTPUT_TILE_PIXELS },
                DisplayOp::EndBatch,
            ]
        );
        assert!(watchdog.feeds() >= 1);
    }

    #[test]
    fn tile_push_feeds_watchdog_periodically() {
        let (fb, mode, mut compositor) = setup();
        let mut dirty = DirtySnapshot::new();
        dirty.set_all();
        let mut display = MemoryDisplay::new().without_log();
        let watchdog = FeedCounter::new();

        let mut pump = DisplayPump::new(4, 16).unwrap();
        pump.push_tiles(&mut compositor, &fb, &mode, &dirty, &mut display, &watchdog)
            .unwrap();
        // 144 / 16 periodic feeds plus the final one
        assert_eq!(watchdog.feeds(), 10);
    }

    #[test]
    fn full_stream_alternates_buffers_and_drains() {
        let (fb, mode, mut compositor) = setup();
        fb.write_u8(0, 255);
        fb.write_u8(mode.frame_bytes() - 1, 255);
        let mut display = MemoryDisplay::new();

        let mut pump = DisplayPump::new(4, 16).unwrap();
        let bands = pump
            .push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog)
            .unwrap();
        assert_eq!(bands, SOURCE_HEIGHT / 4);

        let ops = display.take_ops();
        assert_eq!(ops[0], DisplayOp::BeginBatch);
        assert_eq!(
            ops[1],
            DisplayOp::SetWindow { x: 0, y: 0, width: OUTPUT_WIDTH, height: OUTPUT_HEIGHT }
        );
        let writes = ops
            .iter()
            .filter(|op| matches!(op, DisplayOp::WriteAsync { .. }))
            .count();
        let waits = ops.iter().filter(|op| **op == DisplayOp::Wait).count();
        assert_eq!(writes, bands);
        assert_eq!(waits, bands);
        assert_eq!(ops.last(), Some(&DisplayOp::EndBatch));

        // index 255 is black and index 0 white in the default palette
        assert_eq!(display.pixel(0, 0), 0x0000);
        assert_eq!(display.pixel(1, 1), 0x0000);
        assert_eq!(display.pixel(OUTPUT_WIDTH - 1, OUTPUT_HEIGHT - 1), 0x0000);
        assert_ne!(display.pixel(2, 0), 0x0000);
        assert!(pump.buffers.iter().all(Option::is_some));
    }

    #[test]
    fn failed_transfer_still_drains_and_ends_batch() {
        let (fb, mode, mut compositor) = setup();
        let mut display = MemoryDisplay::new();
        display.fail_writes(1);

        let mut pump = DisplayPump::new(4, 16).unwrap();
        let result = pump.push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog);
        assert!(matches!(result, Err(DisplayError::TransferFailed(_))));
        assert!(!display.in_batch());
    }

    #[test]
    fn full_stream_feeds_watchdog_periodically() {
        let (fb, mode, mut compositor) = setup();
        let mut display = MemoryDisplay::new().without_log();
        let watchdog = FeedCounter::new();

        let mut pump = DisplayPump::new(4, 16).unwrap();
        let bands = pump
            .push_full_stream(&mut compositor, &fb, &mode, &mut display, &watchdog)
            .unwrap();
        assert_eq!(bands, 90);
        // 90 / 16 periodic feeds plus the final one
        assert_eq!(watchdog.feeds(), 6);
    }

    fn buffer_addresses(pump: &DisplayPump) -> Vec<*const u16> {
        let mut addresses: Vec<_> = pump
            .buffers
            .iter()
            .flatten()
            .map(|buffer| buffer.as_ptr())
            .collect();
        addresses.sort();
        addresses
    }

    #[test]
    fn band_buffers_exist_before_the_first_push() {
        let pump = DisplayPump::new(4, 16).unwrap();
        let band_len = FrameCompositor::band_pixels(4);
        for buffer in pump.buffers.iter() {
            assert_eq!(buffer.as_ref().map(Vec::len), Some(band_len));
        }
    }

    #[test]
    fn oversized_bands_fail_allocation() {
        let rows = isize::MAX as usize / FrameCompositor::band_pixels(1) + 1;
        assert!(matches!(
            DisplayPump::new(rows, 16),
            Err(VideoError::AllocationFailed { what: "band buffer", .. })
        ));
    }

    #[test]
    fn rejected_write_keeps_both_band_buffers() {
        let (fb, mode, mut compositor) = setup();
        let mut display = MemoryDisplay::new();
        let mut pump = DisplayPump::new(4, 16).unwrap();
        let allocated = buffer_addresses(&pump);

        pump.push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog)
            .unwrap();
        assert_eq!(buffer_addresses(&pump), allocated);

        display.fail_writes(1);
        assert!(pump
            .push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog)
            .is_err());
        assert!(pump.buffers.iter().all(Option::is_some));
        assert_eq!(buffer_addresses(&pump), allocated);

        pump.push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog)
            .unwrap();
        assert_eq!(buffer_addresses(&pump), allocated);
    }

    /// Fails the `fail_at`-th wait, handing the in-flight buffer back.
    struct FailingWait {
        inner: MemoryDisplay,
        waits: usize,
        fail_at: usize,
    }

    impl DisplayController for FailingWait {
        fn begin_batch(&mut self) -> Result<(), DisplayError> {
            self.inner.begin_batch()
        }

        fn end_batch(&mut self) -> Result<(), DisplayError> {
            self.inner.end_batch()
        }

        fn set_window(
            &mut self,
            x: usize,
            y: usize,
            width: usize,
            height: usize,
        ) -> Result<(), DisplayError> {
            self.inner.set_window(x, y, width, height)
        }

        fn write_pixels(&mut self, pixels: &[u16]) -> Result<(), DisplayError> {
            self.inner.write_pixels(pixels)
        }

        fn write_pixels_async(&mut self, pixels: Vec<u16>) -> Result<(), TransferError> {
            self.inner.write_pixels_async(pixels)
        }

        fn wait_transfer_complete(&mut self) -> Result<Option<Vec<u16>>, TransferError> {
            self.waits += 1;
            match self.inner.wait_transfer_complete()? {
                Some(pixels) if self.waits == self.fail_at => Err(TransferError::new(
                    DisplayError::TransferFailed("bus error".into()),
                    pixels,
                )),
                done => Ok(done),
            }
        }
    }

    #[test]
    fn failed_wait_mid_stream_keeps_both_band_buffers() {
        let (fb, mode, mut compositor) = setup();
        let mut display = FailingWait {
            inner: MemoryDisplay::new(),
            waits: 0,
            fail_at: 3,
        };
        let mut pump = DisplayPump::new(4, 16).unwrap();
        let allocated = buffer_addresses(&pump);

        let result = pump.push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog);
        assert!(matches!(result, Err(DisplayError::TransferFailed(_))));
        assert!(!display.inner.in_batch());
        assert_eq!(buffer_addresses(&pump), allocated);
    }
}
