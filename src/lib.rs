// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tilevid tile-based video compositor
//!
//! This library provides the video half of a small emulated console: an
//! indexed frame buffer written by a producer thread, lock-free tile dirty
//! tracking, palette lookup with a 2x upscale, and a render thread that
//! pushes only the changed tiles to an RGB565 display.

pub mod compositor;
pub mod config;
pub mod core;
pub mod dirty;
pub mod display;
pub mod error;
pub mod mode;
pub mod palette;
pub mod pixel;
pub mod pump;
pub mod scheduler;
pub mod subsystem;

// Re-export commonly used types
pub use compositor::FrameCompositor;
pub use config::VideoConfig;
pub use crate::core::{FrameBuffer, TileRect};
pub use dirty::{DirtySnapshot, DirtyTileTracker};
pub use display::{Batch, DisplayController, DisplayOp, MemoryDisplay};
pub use error::{DisplayError, TransferError, VideoError};
pub use mode::{VideoDepth, VideoMode};
pub use palette::PaletteStore;
pub use pump::{DisplayPump, FeedCounter, NoWatchdog, PushMode, Watchdog};
pub use scheduler::{CycleOutcome, FrameSignal, RenderScheduler, RenderStats, SchedulerState};
pub use subsystem::{RenderThread, RepaintFlags, VideoSubsystem};
