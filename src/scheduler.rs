// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Render thread control loop.
//!
//! Each cycle walks Idle → Collecting → Rendering → Reporting → Idle:
//!
//! - **Idle** waits for a frame signal or the wait timeout, whichever comes
//!   first, and skips the cycle if the last render is younger than the
//!   minimum frame interval.
//! - **Collecting** refreshes the local palette copy and swaps out the dirty
//!   accumulator. A palette change, a mode switch or an explicit request
//!   turns the cycle into a full repaint.
//! - **Rendering** pushes the dirty tiles, or the whole frame, to the display.
//!   A cycle with nothing dirty is a skip.
//! - **Reporting** periodically logs the running counters.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::compositor::FrameCompositor;
use crate::config::VideoConfig;
use crate::core::geometry::TILE_COUNT;
use crate::dirty::DirtySnapshot;
use crate::display::DisplayController;
use crate::error::VideoError;
use crate::pump::{DisplayPump, PushMode, Watchdog};
use crate::subsystem::Shared;

/// Wake-up hint from the producer to the render thread.
///
/// [`notify`](Self::notify) sets a flag and unparks the registered waiter.
/// The waiter slot lock is only held to read or replace the handle, so the
/// producer never waits on the render thread.
#[derive(Debug, Default)]
pub struct FrameSignal {
    pending: AtomicBool,
    waiter: Mutex<Option<Thread>>,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        if let Some(waiter) = self.waiter().as_ref() {
            waiter.unpark();
        }
    }

    /// Make the calling thread the one woken by [`notify`](Self::notify),
    /// replacing any earlier waiter.
    pub fn register_waiter(&self) {
        *self.waiter() = Some(thread::current());
    }

    fn waiter(&self) -> MutexGuard<'_, Option<Thread>> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until notified or `timeout` elapses. Returns whether a signal
    /// was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending.swap(false, Ordering::AcqRel) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::park_timeout(deadline - now);
        }
    }
}

/// Control loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Collecting,
    Rendering,
    Reporting,
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Too soon after the previous render; nothing was collected.
    RateLimited,
    /// Nothing dirty and no forced repaint.
    Skipped,
    /// `tiles` counts what reached the display: the dirty tiles in tile
    /// mode, the whole grid in full-stream mode.
    Rendered {
        tiles: usize,
        full: bool,
        mode: PushMode,
    },
    /// The display rejected a transfer; the tiles stay dirty.
    Failed,
}

/// Running counters of the render loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub full_updates: u64,
    pub partial_updates: u64,
    pub skipped: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub tiles_pushed: u64,
    pub full_stream_pushes: u64,
    pub detect_time: Duration,
    pub render_time: Duration,
}

impl RenderStats {
    /// Average render time per rendered frame.
    pub fn average_render_time(&self) -> Duration {
        match u32::try_from(self.frames_rendered) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(frames) => self.render_time / frames,
        }
    }
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames ({} full, {} partial, {} streamed), {} skipped, {} rate-limited, {} failed, \
             {} tiles, detect {:?}, render {:?} (avg {:?})",
            self.frames_rendered,
            self.full_updates,
            self.partial_updates,
            self.full_stream_pushes,
            self.skipped,
            self.rate_limited,
            self.failed,
            self.tiles_pushed,
            self.detect_time,
            self.render_time,
            self.average_render_time()
        )
    }
}

/// The render-side control loop.
pub struct RenderScheduler<D, W> {
    shared: Arc<Shared>,
    config: VideoConfig,
    compositor: FrameCompositor,
    pump: DisplayPump,
    dirty: DirtySnapshot,
    display: D,
    watchdog: W,
    state: SchedulerState,
    stats: RenderStats,
    last_render: Option<Instant>,
    last_report: Option<Instant>,
}

impl<D: DisplayController, W: Watchdog> RenderScheduler<D, W> {
    /// Fails if the render buffers cannot be allocated.
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: VideoConfig,
        display: D,
        watchdog: W,
    ) -> Result<Self, VideoError> {
        let pump = DisplayPump::new(config.band_rows, config.watchdog_feed_tiles)?;
        Ok(Self {
            shared,
            config,
            compositor: FrameCompositor::new(),
            pump,
            dirty: DirtySnapshot::new(),
            display,
            watchdog,
            state: SchedulerState::Idle,
            stats: RenderStats::default(),
            last_render: None,
            last_report: None,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn into_parts(self) -> (D, RenderStats) {
        (self.display, self.stats)
    }

    fn enter(&mut self, state: SchedulerState) {
        if self.state != state {
            trace!("scheduler {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Run one cycle as if woken at `now`.
    pub fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        let too_soon = self.last_render.is_some_and(|last| {
            now.saturating_duration_since(last) < self.config.min_frame_interval
        });
        if too_soon {
            self.stats.rate_limited += 1;
            self.enter(SchedulerState::Idle);
            return CycleOutcome::RateLimited;
        }

        self.enter(SchedulerState::Collecting);
        let started = Instant::now();
        let palette_changed = self.compositor.refresh_palette(&self.shared.palette);
        let forced = self.shared.take_repaint();
        let mode = self.shared.mode.load();
        let mut dirty = self.shared.tracker.collect_and_clear(&mut self.dirty);
        let full = palette_changed || !forced.is_empty();
        if full {
            debug!("full repaint (palette: {palette_changed}, flags: {forced:?})");
            self.dirty.set_all();
            dirty = TILE_COUNT;
        }
        self.stats.detect_time += started.elapsed();

        if dirty == 0 {
            self.stats.skipped += 1;
            self.report(now);
            return CycleOutcome::Skipped;
        }

        self.enter(SchedulerState::Rendering);
        let started = Instant::now();
        let push_mode = PushMode::select(dirty, self.config.full_stream_threshold_percent);
        let result = match push_mode {
            PushMode::TileDirect => self.pump.push_tiles(
                &mut self.compositor,
                &self.shared.frame_buffer,
                &mode,
                &self.dirty,
                &mut self.display,
                &self.watchdog,
            ),
            PushMode::FullStream => self
                .pump
                .push_full_stream(
                    &mut self.compositor,
                    &self.shared.frame_buffer,
                    &mode,
                    &mut self.display,
                    &self.watchdog,
                )
                .map(|_| TILE_COUNT),
        };
        self.stats.render_time += started.elapsed();

        let outcome = match result {
            Ok(tiles) => {
                self.stats.frames_rendered += 1;
                self.stats.tiles_pushed += tiles as u64;
                if full {
                    self.stats.full_updates += 1;
                } else {
                    self.stats.partial_updates += 1;
                }
                if push_mode == PushMode::FullStream {
                    self.stats.full_stream_pushes += 1;
                }
                self.last_render = Some(now);
                trace!("rendered {tiles} tiles via {push_mode:?}");
                CycleOutcome::Rendered {
                    tiles,
                    full,
                    mode: push_mode,
                }
            }
            Err(err) => {
                warn!("display push failed, keeping {dirty} tiles dirty: {err}");
                self.shared.tracker.restore(&self.dirty);
                self.stats.failed += 1;
                CycleOutcome::Failed
            }
        };
        self.report(now);
        outcome
    }

    fn report(&mut self, now: Instant) {
        self.enter(SchedulerState::Reporting);
        match self.last_report {
            None => self.last_report = Some(now),
            Some(last) if now.saturating_duration_since(last) >= self.config.report_interval => {
                info!("video: {}", self.stats);
                self.last_report = Some(now);
            }
            Some(_) => {}
        }
        self.enter(SchedulerState::Idle);
    }

    /// Loop until the subsystem's running flag clears, then hand back the
    /// display and the final counters.
    pub fn run(mut self) -> (D, RenderStats) {
        let shared = Arc::clone(&self.shared);
        shared.signal.register_waiter();
        info!(
            "render loop running: min interval {:?}, timeout {:?}",
            self.config.min_frame_interval, self.config.wait_timeout
        );
        while shared.running.load(Ordering::Acquire) {
            self.enter(SchedulerState::Idle);
            shared.signal.wait_timeout(self.config.wait_timeout);
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            self.run_cycle(Instant::now());
        }
        info!("render loop exited: {}", self.stats);
        self.into_parts()
    }
}
