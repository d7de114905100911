// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Video subsystem integration
//!
//! [`VideoSubsystem`] owns everything the producer and the render thread
//! share: the frame buffer, the dirty tracker, the palette, the active mode
//! and the forced-repaint flags. The producer (the instruction interpreter)
//! calls its write-path methods directly; [`VideoSubsystem::start`] moves a
//! [`RenderScheduler`] onto a dedicated thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use bitflags::bitflags;
use log::{debug, info, warn};

use crate::config::VideoConfig;
use crate::core::FrameBuffer;
use crate::dirty::DirtyTileTracker;
use crate::display::DisplayController;
use crate::error::VideoError;
use crate::mode::{ModeCell, VideoMode};
use crate::palette::PaletteStore;
use crate::pump::Watchdog;
use crate::scheduler::{FrameSignal, RenderScheduler, RenderStats};

bitflags! {
    /// Reasons the next cycle must repaint every tile.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RepaintFlags: u8 {
        const STARTUP = 0x01;
        const PALETTE = 0x02;
        const MODE_SWITCH = 0x04;
        const REQUESTED = 0x08;
    }
}

/// State shared between the producer and the render thread.
pub(crate) struct Shared {
    pub(crate) frame_buffer: FrameBuffer,
    pub(crate) tracker: DirtyTileTracker,
    pub(crate) palette: PaletteStore,
    pub(crate) mode: ModeCell,
    pub(crate) signal: FrameSignal,
    pub(crate) running: AtomicBool,
    repaint: AtomicU8,
}

impl Shared {
    pub(crate) fn request_repaint(&self, reason: RepaintFlags) {
        self.repaint.fetch_or(reason.bits(), Ordering::Release);
    }

    pub(crate) fn take_repaint(&self) -> RepaintFlags {
        RepaintFlags::from_bits_truncate(self.repaint.swap(0, Ordering::AcqRel))
    }
}

/// The emulated display: frame buffer, dirty tracking, palette and mode.
pub struct VideoSubsystem {
    shared: Arc<Shared>,
    config: VideoConfig,
    started: AtomicBool,
}

impl VideoSubsystem {
    /// Allocate the frame buffer and set up the boot mode.
    ///
    /// Fails if the configuration is invalid or the frame buffer cannot be
    /// allocated; the render thread must not be started then.
    pub fn new(config: VideoConfig) -> Result<Self, VideoError> {
        config.validate()?;
        let mode = VideoMode::with_depth(config.initial_depth);
        mode.validate()?;

        let frame_buffer = FrameBuffer::new(FrameBuffer::CAPACITY, config.clear_value)?;
        info!(
            "video init: {mode}, frame buffer {} bytes, {}x{} tiles",
            frame_buffer.len(),
            crate::core::geometry::TILES_X,
            crate::core::geometry::TILES_Y
        );

        let shared = Shared {
            frame_buffer,
            tracker: DirtyTileTracker::new(),
            palette: PaletteStore::new(),
            mode: ModeCell::new(mode),
            signal: FrameSignal::new(),
            running: AtomicBool::new(false),
            repaint: AtomicU8::new(RepaintFlags::STARTUP.bits()),
        };
        Ok(Self {
            shared: Arc::new(shared),
            config,
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// The active video mode.
    pub fn mode(&self) -> VideoMode {
        self.shared.mode.load()
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.shared.frame_buffer
    }

    /// Bytes addressed by the active mode.
    pub fn frame_buffer_size(&self) -> usize {
        self.mode().frame_bytes()
    }

    pub fn tracker(&self) -> &DirtyTileTracker {
        &self.shared.tracker
    }

    pub fn palette(&self) -> &PaletteStore {
        &self.shared.palette
    }

    /// Record a single-byte write at `offset`.
    pub fn mark_dirty_at_offset(&self, offset: usize) {
        let mode = self.shared.mode.load();
        self.shared.tracker.mark_dirty_at_offset(offset, &mode);
    }

    /// Record a `size`-byte write at `offset`.
    pub fn mark_dirty_range(&self, offset: usize, size: usize) {
        let mode = self.shared.mode.load();
        self.shared.tracker.mark_dirty_range(offset, size, &mode);
    }

    pub fn write_u8(&self, offset: usize, value: u8) {
        self.shared.frame_buffer.write_u8(offset, value);
        self.mark_dirty_at_offset(offset);
    }

    pub fn write_u16(&self, offset: usize, value: u16) {
        self.shared.frame_buffer.write_u16(offset, value);
        self.mark_dirty_range(offset, 2);
    }

    pub fn write_u32(&self, offset: usize, value: u32) {
        self.shared.frame_buffer.write_u32(offset, value);
        self.mark_dirty_range(offset, 4);
    }

    pub fn write_bytes(&self, offset: usize, data: &[u8]) {
        self.shared.frame_buffer.write_bytes(offset, data);
        self.mark_dirty_range(offset, data.len());
    }

    /// Load `count` RGB888 entries and force a full repaint.
    pub fn set_palette(&self, rgb: &[u8], count: usize) -> usize {
        let written = self.shared.palette.set_palette(rgb, count);
        self.shared.request_repaint(RepaintFlags::PALETTE);
        written
    }

    /// Replace the active mode.
    ///
    /// The new geometry is in effect for every mark made after this returns.
    pub fn switch_mode(&self, mode: VideoMode) -> Result<(), VideoError> {
        if let Err(err) = mode.validate() {
            warn!("rejected video mode {mode}: {err}");
            return Err(err);
        }
        let previous = self.shared.mode.replace(mode);
        self.shared.request_repaint(RepaintFlags::MODE_SWITCH);
        info!("video mode switched: {previous} -> {mode}");
        Ok(())
    }

    /// Repaint every tile on the next cycle.
    pub fn request_full_repaint(&self) {
        debug!("full repaint requested");
        self.shared.request_repaint(RepaintFlags::REQUESTED);
    }

    /// Non-blocking wake hint for the render thread.
    pub fn signal_frame_ready(&self) {
        self.shared.signal.notify();
    }

    /// A scheduler over this subsystem, for driving cycles by hand.
    ///
    /// Allocates the render buffers; fails if they cannot be allocated.
    pub fn scheduler<D, W>(
        &self,
        display: D,
        watchdog: W,
    ) -> Result<RenderScheduler<D, W>, VideoError>
    where
        D: DisplayController,
        W: Watchdog,
    {
        RenderScheduler::new(Arc::clone(&self.shared), self.config.clone(), display, watchdog)
    }

    /// Spawn the render thread. The subsystem starts at most once.
    ///
    /// Render buffers are allocated before the thread is spawned; an
    /// allocation failure leaves the subsystem unstarted.
    pub fn start<D, W>(&self, display: D, watchdog: W) -> Result<RenderThread<D>, VideoError>
    where
        D: DisplayController + Send + 'static,
        W: Watchdog + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(VideoError::AlreadyStarted);
        }
        let scheduler = match self.scheduler(display, watchdog) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                self.started.store(false, Ordering::Release);
                return Err(err);
            }
        };
        self.shared.running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("video-render".into())
            .spawn(move || scheduler.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(VideoError::Spawn(err));
            }
        };
        info!("render thread started");
        Ok(RenderThread {
            shared: Arc::clone(&self.shared),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

/// Handle to the running render thread.
///
/// Dropping the handle stops and joins the thread.
pub struct RenderThread<D> {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<(D, RenderStats)>>,
}

impl<D> RenderThread<D> {
    /// Stop after the current cycle and hand back the display and counters.
    pub fn stop(mut self) -> Result<(D, RenderStats), VideoError> {
        self.request_stop();
        let handle = self.handle.take().ok_or(VideoError::RenderThreadPanicked)?;
        let parts = handle.join().map_err(|_| VideoError::RenderThreadPanicked)?;
        info!("render thread stopped");
        Ok(parts)
    }

    fn request_stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.signal.notify();
    }
}

impl<D> Drop for RenderThread<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.request_stop();
            if handle.join().is_err() {
                warn!("render thread panicked");
            }
        }
    }
}
