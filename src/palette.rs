// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! 256-entry color lookup table shared between the producer and the renderer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::pixel::rgb888_to_rgb565;

pub const PALETTE_SIZE: usize = 256;

/// Display colors indexed by palette index.
pub type PaletteTable = [u16; PALETTE_SIZE];

/// Inverted grayscale ramp: index 0 is white, index 255 is black.
pub fn default_palette() -> PaletteTable {
    let mut table = [0u16; PALETTE_SIZE];
    for (index, entry) in table.iter_mut().enumerate() {
        let gray = 255 - index as u8;
        *entry = rgb888_to_rgb565(gray, gray, gray);
    }
    table
}

/// Palette guarded by a short critical section plus a lock-free "changed" flag.
///
/// The renderer polls [`snapshot_if_changed`](Self::snapshot_if_changed) every
/// cycle; it only takes the lock when the producer has actually stored new
/// colors since the last copy.
pub struct PaletteStore {
    entries: Mutex<PaletteTable>,
    changed: AtomicBool,
}

impl PaletteStore {
    /// A store holding [`default_palette`], flagged as changed so the first
    /// render picks it up.
    pub fn new() -> Self {
        Self::with_table(default_palette())
    }

    pub fn with_table(table: PaletteTable) -> Self {
        Self {
            entries: Mutex::new(table),
            changed: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaletteTable> {
        // A panicked writer leaves whole u16 entries behind; keep rendering.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store up to `count` RGB888 triplets from `rgb`, starting at index 0.
    ///
    /// `count` is capped at 256 and at the number of complete triplets in
    /// `rgb`. Returns the number of entries written.
    pub fn set_palette(&self, rgb: &[u8], count: usize) -> usize {
        let count = count.min(PALETTE_SIZE).min(rgb.len() / 3);
        {
            let mut entries = self.lock();
            for (entry, color) in entries.iter_mut().zip(rgb.chunks_exact(3)).take(count) {
                *entry = rgb888_to_rgb565(color[0], color[1], color[2]);
            }
        }
        self.changed.store(true, Ordering::Release);
        debug!("palette updated: {count} entries");
        count
    }

    /// Copy the table into `local` if it changed since the last copy.
    ///
    /// Returns whether a copy was taken. Only the render thread calls this.
    pub fn snapshot_if_changed(&self, local: &mut PaletteTable) -> bool {
        if !self.changed.load(Ordering::Acquire) {
            return false;
        }
        let entries = self.lock();
        local.copy_from_slice(&*entries);
        // Cleared under the lock so a concurrent set_palette is never lost.
        self.changed.store(false, Ordering::Release);
        true
    }

    pub fn is_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Current display color for `index`.
    pub fn entry(&self, index: u8) -> u16 {
        self.lock()[index as usize]
    }
}

impl Default for PaletteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_palette_is_inverted_gray() {
        let table = default_palette();
        assert_eq!(table[0], 0xFFFF);
        assert_eq!(table[255], 0x0000);
    }

    #[test]
    fn set_palette_converts_and_flags() {
        let store = PaletteStore::new();
        let mut local = [0u16; PALETTE_SIZE];
        assert!(store.snapshot_if_changed(&mut local));
        assert!(!store.is_changed());

        let written = store.set_palette(&[0xFF, 0x00, 0x00, 0x00, 0xFF, 0x00], 2);
        assert_eq!(written, 2);
        assert!(store.is_changed());
        assert_eq!(store.entry(0), 0xF800);
        assert_eq!(store.entry(1), 0x07E0);
        // untouched entries keep their old color
        assert_eq!(store.entry(2), default_palette()[2]);
    }

    #[test]
    fn count_is_capped() {
        let store = PaletteStore::new();
        let rgb = vec![0u8; 3 * 300];
        assert_eq!(store.set_palette(&rgb, 300), PALETTE_SIZE);
        // fewer triplets than requested
        assert_eq!(store.set_palette(&[1, 2, 3, 4], 5), 1);
    }

    #[test]
    fn snapshot_only_copies_once_per_change() {
        let store = PaletteStore::new();
        let mut local = [0u16; PALETTE_SIZE];
        assert!(store.snapshot_if_changed(&mut local));
        assert_eq!(local, default_palette());

        local[0] = 0x1234;
        assert!(!store.snapshot_if_changed(&mut local));
        assert_eq!(local[0], 0x1234);

        store.set_palette(&[0, 0, 0], 1);
        assert!(store.snapshot_if_changed(&mut local));
        assert_eq!(local[0], 0x0000);
    }
}
