// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

// A simple demo program for the Tilevid compositor.
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tilevid_core::core::geometry::OUTPUT_WIDTH;
use tilevid_core::{FeedCounter, MemoryDisplay, VideoConfig, VideoDepth, VideoMode, VideoSubsystem};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Tilevid Compositor v0.1.0");
    println!("=========================");
    println!();

    let video = VideoSubsystem::new(VideoConfig::default()).context("video init failed")?;
    println!("Mode: {}", video.mode());
    println!("Frame buffer: {} bytes", video.frame_buffer_size());
    println!();

    let watchdog = Arc::new(FeedCounter::new());
    let render = video
        .start(MemoryDisplay::new().without_log(), Arc::clone(&watchdog))
        .context("failed to start render thread")?;

    println!("Producing frames...");
    let started = Instant::now();

    // A bar sweeping down the screen, one row per frame.
    for frame in 0..60usize {
        let stride = video.mode().bytes_per_row;
        let line = vec![(frame as u8).wrapping_mul(4); stride];
        video.write_bytes(frame * 6 * stride, &line);
        video.write_u32(frame * 8, 0xFFFF_FFFF);

        if frame == 20 {
            // Red-to-blue ramp on the low entries.
            let mut rgb = Vec::with_capacity(16 * 3);
            for i in 0..16u8 {
                rgb.extend_from_slice(&[255 - i * 16, 0, i * 16]);
            }
            video.set_palette(&rgb, 16);
        }
        if frame == 40 {
            video.switch_mode(VideoMode::with_depth(VideoDepth::Bits4))?;
        }

        video.signal_frame_ready();
        thread::sleep(Duration::from_millis(33));
    }

    let elapsed = started.elapsed();
    let (display, stats) = render.stop()?;
    println!("Production complete!");
    println!();

    println!("Render statistics:");
    println!("  Elapsed:         {:?}", elapsed);
    println!("  Frames:          {}", stats.frames_rendered);
    println!("  Full updates:    {}", stats.full_updates);
    println!("  Partial updates: {}", stats.partial_updates);
    println!("  Skipped:         {}", stats.skipped);
    println!("  Rate limited:    {}", stats.rate_limited);
    println!("  Failed:          {}", stats.failed);
    println!("  Tiles pushed:    {}", stats.tiles_pushed);
    println!("  Avg render:      {:?}", stats.average_render_time());
    println!("  Watchdog feeds:  {}", watchdog.feeds());
    println!();

    let corner = display.pixel(0, 0);
    let center = display.surface()[360 * OUTPUT_WIDTH + 640];
    println!("Display samples:");
    println!("  (0, 0):      0x{:04X}", corner);
    println!("  (640, 360):  0x{:04X}", center);
    println!();

    if stats.frames_rendered > 0 && stats.failed == 0 {
        println!("✓ Demo rendered successfully!");
    } else {
        println!("✗ Demo did not render as expected.");
    }
    Ok(())
}
