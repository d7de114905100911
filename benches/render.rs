// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use tilevid_core::{
    DirtySnapshot, DirtyTileTracker, DisplayPump, FrameBuffer, FrameCompositor, MemoryDisplay,
    NoWatchdog, PaletteStore, VideoDepth, VideoMode,
};

fn patterned(mode: &VideoMode) -> FrameBuffer {
    let fb = FrameBuffer::new(FrameBuffer::CAPACITY, 0).unwrap();
    for offset in 0..mode.frame_bytes() {
        fb.write_u8(offset, (offset * 7) as u8);
    }
    fb
}

fn compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose_tile");
    for depth in VideoDepth::ALL {
        let mode = VideoMode::with_depth(depth);
        let fb = patterned(&mode);
        let mut compositor = FrameCompositor::new();
        compositor.refresh_palette(&PaletteStore::new());
        group.bench_function(format!("{depth}"), |b| {
            b.iter(|| black_box(compositor.compose_tile(&fb, &mode, black_box(77))[0]))
        });
    }
    group.finish();
}

fn push(c: &mut Criterion) {
    let mode = VideoMode::with_depth(VideoDepth::Bits8);
    let fb = patterned(&mode);
    let mut compositor = FrameCompositor::new();
    compositor.refresh_palette(&PaletteStore::new());
    let mut display = MemoryDisplay::new().without_log();
    let mut pump = DisplayPump::new(4, 16).unwrap();
    let mut dirty = DirtySnapshot::new();
    dirty.set_all();

    c.bench_function("push_tiles_all", |b| {
        b.iter(|| {
            pump.push_tiles(&mut compositor, &fb, &mode, &dirty, &mut display, &NoWatchdog)
                .unwrap()
        })
    });
    c.bench_function("push_full_stream", |b| {
        b.iter(|| {
            pump.push_full_stream(&mut compositor, &fb, &mode, &mut display, &NoWatchdog)
                .unwrap()
        })
    });
}

fn track(c: &mut Criterion) {
    let mode = VideoMode::with_depth(VideoDepth::Bits4);
    let tracker = DirtyTileTracker::new();
    let mut snapshot = DirtySnapshot::new();
    c.bench_function("mark_and_collect", |b| {
        b.iter(|| {
            for offset in (0..mode.frame_bytes()).step_by(997) {
                tracker.mark_dirty_at_offset(black_box(offset), &mode);
            }
            black_box(tracker.collect_and_clear(&mut snapshot))
        })
    });
}

criterion_group!(benches, compose, push, track);
criterion_main!(benches);
