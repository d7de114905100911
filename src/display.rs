// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Display controller boundary.
//!
//! The panel is driven through windowed writes: select a rectangle with
//! [`DisplayController::set_window`], then stream pixels into it row-major.
//! Writes are either synchronous or handed off as an owned buffer that the
//! controller returns from [`DisplayController::wait_transfer_complete`], so
//! a buffer can never be refilled while the controller still reads it.

use std::ops::{Deref, DerefMut};

use log::warn;

use crate::core::geometry::{OUTPUT_HEIGHT, OUTPUT_WIDTH};
use crate::error::{DisplayError, TransferError};

/// Pixel transfer interface of the physical display.
pub trait DisplayController {
    /// Acquire the bus for one or more window/write operations.
    fn begin_batch(&mut self) -> Result<(), DisplayError>;

    fn end_batch(&mut self) -> Result<(), DisplayError>;

    /// Select the destination rectangle for subsequent writes.
    fn set_window(
        &mut self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<(), DisplayError>;

    /// Write pixels and return once the controller has consumed them.
    fn write_pixels(&mut self, pixels: &[u16]) -> Result<(), DisplayError>;

    /// Start a transfer of `pixels` without waiting for it.
    ///
    /// At most one transfer is in flight; the buffer comes back from
    /// [`wait_transfer_complete`](Self::wait_transfer_complete), or inside
    /// the error if the transfer cannot be started.
    fn write_pixels_async(&mut self, pixels: Vec<u16>) -> Result<(), TransferError>;

    /// Block until the in-flight transfer finishes and return its buffer,
    /// or `None` if nothing was in flight. A failed transfer still hands
    /// its buffer back through [`TransferError`].
    fn wait_transfer_complete(&mut self) -> Result<Option<Vec<u16>>, TransferError>;
}

impl<D: DisplayController + ?Sized> DisplayController for &mut D {
    fn begin_batch(&mut self) -> Result<(), DisplayError> {
        (**self).begin_batch()
    }

    fn end_batch(&mut self) -> Result<(), DisplayError> {
        (**self).end_batch()
    }

    fn set_window(
        &mut self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<(), DisplayError> {
        (**self).set_window(x, y, width, height)
    }

    fn write_pixels(&mut self, pixels: &[u16]) -> Result<(), DisplayError> {
        (**self).write_pixels(pixels)
    }

    fn write_pixels_async(&mut self, pixels: Vec<u16>) -> Result<(), TransferError> {
        (**self).write_pixels_async(pixels)
    }

    fn wait_transfer_complete(&mut self) -> Result<Option<Vec<u16>>, TransferError> {
        (**self).wait_transfer_complete()
    }
}

/// Scoped batch: `begin_batch` on creation, `end_batch` on [`finish`](Self::finish) or drop.
pub struct Batch<'a, D: DisplayController + ?Sized> {
    display: &'a mut D,
    open: bool,
}

impl<'a, D: DisplayController + ?Sized> Batch<'a, D> {
    pub fn begin(display: &'a mut D) -> Result<Self, DisplayError> {
        display.begin_batch()?;
        Ok(Self {
            display,
            open: true,
        })
    }

    /// End the batch, reporting any error from the controller.
    pub fn finish(mut self) -> Result<(), DisplayError> {
        self.open = false;
        self.display.end_batch()
    }
}

impl<D: DisplayController + ?Sized> Deref for Batch<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.display
    }
}

impl<D: DisplayController + ?Sized> DerefMut for Batch<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.display
    }
}

impl<D: DisplayController + ?Sized> Drop for Batch<'_, D> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.display.end_batch() {
                warn!("failed to end display batch: {err}");
            }
        }
    }
}

/// One operation seen by a [`MemoryDisplay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayOp {
    BeginBatch,
    EndBatch,
    SetWindow {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    Write { pixels: usize },
    WriteAsync { pixels: usize },
    Wait,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    cursor: usize,
}

/// In-memory RGB565 panel that records every operation.
///
/// Async transfers land on the surface when they are waited for. A number
/// of upcoming writes can be made to fail with [`fail_writes`](Self::fail_writes).
pub struct MemoryDisplay {
    surface: Vec<u16>,
    window: Option<Window>,
    in_batch: bool,
    in_flight: Option<Vec<u16>>,
    ops: Vec<DisplayOp>,
    failures: usize,
    record: bool,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self {
            surface: vec![0; OUTPUT_WIDTH * OUTPUT_HEIGHT],
            window: None,
            in_batch: false,
            in_flight: None,
            ops: Vec::new(),
            failures: 0,
            record: true,
        }
    }

    /// Stop keeping the operation log, for long-running use.
    pub fn without_log(mut self) -> Self {
        self.record = false;
        self
    }

    pub fn surface(&self) -> &[u16] {
        &self.surface
    }

    pub fn pixel(&self, x: usize, y: usize) -> u16 {
        self.surface[y * OUTPUT_WIDTH + x]
    }

    pub fn ops(&self) -> &[DisplayOp] {
        &self.ops
    }

    /// Drain the operation log.
    pub fn take_ops(&mut self) -> Vec<DisplayOp> {
        std::mem::take(&mut self.ops)
    }

    /// Make the next `count` pixel writes fail.
    pub fn fail_writes(&mut self, count: usize) {
        self.failures = count;
    }

    pub fn in_batch(&self) -> bool {
        self.in_batch
    }

    fn log(&mut self, op: DisplayOp) {
        if self.record {
            self.ops.push(op);
        }
    }

    fn check_write(&mut self, count: usize) -> Result<(), DisplayError> {
        if !self.in_batch {
            return Err(DisplayError::NoBatch);
        }
        if self.failures > 0 {
            self.failures -= 1;
            return Err(DisplayError::TransferFailed("injected failure".into()));
        }
        let window = self.window.ok_or(DisplayError::WindowOutOfBounds {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        })?;
        let remaining = window.width * window.height - window.cursor;
        if count > remaining {
            return Err(DisplayError::WindowOverflow { count, remaining });
        }
        Ok(())
    }

    fn blit(&mut self, pixels: &[u16]) {
        let Some(window) = self.window.as_mut() else {
            return;
        };
        for &color in pixels {
            let x = window.x + window.cursor % window.width;
            let y = window.y + window.cursor / window.width;
            self.surface[y * OUTPUT_WIDTH + x] = color;
            window.cursor += 1;
        }
    }
}

impl Default for MemoryDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayController for MemoryDisplay {
    fn begin_batch(&mut self) -> Result<(), DisplayError> {
        self.in_batch = true;
        self.log(DisplayOp::BeginBatch);
        Ok(())
    }

    fn end_batch(&mut self) -> Result<(), DisplayError> {
        if !self.in_batch {
            return Err(DisplayError::NoBatch);
        }
        self.in_batch = false;
        self.log(DisplayOp::EndBatch);
        Ok(())
    }

    fn set_window(
        &mut self,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Result<(), DisplayError> {
        if !self.in_batch {
            return Err(DisplayError::NoBatch);
        }
        if width == 0 || height == 0 || x + width > OUTPUT_WIDTH || y + height > OUTPUT_HEIGHT {
            return Err(DisplayError::WindowOutOfBounds {
                x,
                y,
                width,
                height,
            });
        }
        self.window = Some(Window {
            x,
            y,
            width,
            height,
            cursor: 0,
        });
        self.log(DisplayOp::SetWindow {
            x,
            y,
            width,
            height,
        });
        Ok(())
    }

    fn write_pixels(&mut self, pixels: &[u16]) -> Result<(), DisplayError> {
        if self.in_flight.is_some() {
            return Err(DisplayError::TransferInFlight);
        }
        self.check_write(pixels.len())?;
        self.blit(pixels);
        self.log(DisplayOp::Write {
            pixels: pixels.len(),
        });
        Ok(())
    }

    fn write_pixels_async(&mut self, pixels: Vec<u16>) -> Result<(), TransferError> {
        if self.in_flight.is_some() {
            return Err(TransferError::new(DisplayError::TransferInFlight, pixels));
        }
        if let Err(err) = self.check_write(pixels.len()) {
            return Err(TransferError::new(err, pixels));
        }
        self.log(DisplayOp::WriteAsync {
            pixels: pixels.len(),
        });
        self.in_flight = Some(pixels);
        Ok(())
    }

    fn wait_transfer_complete(&mut self) -> Result<Option<Vec<u16>>, TransferError> {
        let Some(pixels) = self.in_flight.take() else {
            return Ok(None);
        };
        self.blit(&pixels);
        self.log(DisplayOp::Wait);
        Ok(Some(pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn windowed_write_lands_in_place() {
        let mut display = MemoryDisplay::new();
        let mut batch = Batch::begin(&mut display).unwrap();
        batch.set_window(10, 20, 2, 2).unwrap();
        batch.write_pixels(&[1, 2, 3, 4]).unwrap();
        batch.finish().unwrap();

        assert_eq!(display.pixel(10, 20), 1);
        assert_eq!(display.pixel(11, 20), 2);
        assert_eq!(display.pixel(10, 21), 3);
        assert_eq!(display.pixel(11, 21), 4);
        assert_eq!(
            display.ops(),
            &[
                DisplayOp::BeginBatch,
                DisplayOp::SetWindow { x: 10, y: 20, width: 2, height: 2 },
                DisplayOp::Write { pixels: 4 },
                DisplayOp::EndBatch,
            ]
        );
    }

    #[test]
    fn batch_ends_on_drop() {
        let mut display = MemoryDisplay::new();
        {
            let _batch = Batch::begin(&mut display).unwrap();
        }
        assert!(!display.in_batch());
        assert_eq!(display.ops().last(), Some(&DisplayOp::EndBatch));
    }

    #[test]
    fn writes_need_a_batch_and_a_window() {
        let mut display = MemoryDisplay::new();
        assert_eq!(display.write_pixels(&[0]), Err(DisplayError::NoBatch));
        display.begin_batch().unwrap();
        assert!(display.set_window(1270, 0, 20, 1).is_err());
        display.set_window(0, 0, 1, 1).unwrap();
        assert_eq!(
            display.write_pixels(&[0, 0]),
            Err(DisplayError::WindowOverflow { count: 2, remaining: 1 })
        );
    }

    #[test]
    fn async_transfer_returns_its_buffer() {
        let mut display = MemoryDisplay::new();
        display.begin_batch().unwrap();
        display.set_window(0, 0, 4, 1).unwrap();
        display.write_pixels_async(vec![9, 9]).unwrap();
        assert_eq!(display.pixel(0, 0), 0);
        assert_eq!(
            display.write_pixels_async(vec![1]),
            Err(TransferError::new(DisplayError::TransferInFlight, vec![1]))
        );
        let buffer = display.wait_transfer_complete().unwrap();
        assert_eq!(buffer, Some(vec![9, 9]));
        assert_eq!(display.pixel(1, 0), 9);
        assert_eq!(display.wait_transfer_complete().unwrap(), None);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut display = MemoryDisplay::new();
        display.begin_batch().unwrap();
        display.set_window(0, 0, 2, 1).unwrap();
        display.fail_writes(1);
        assert!(matches!(
            display.write_pixels(&[1]),
            Err(DisplayError::TransferFailed(_))
        ));
        display.write_pixels(&[1]).unwrap();
    }

    #[test]
    fn rejected_async_write_returns_the_buffer() {
        let mut display = MemoryDisplay::new();
        assert_eq!(
            display.write_pixels_async(vec![7; 3]),
            Err(TransferError::new(DisplayError::NoBatch, vec![7; 3]))
        );
        display.begin_batch().unwrap();
        display.set_window(0, 0, 4, 1).unwrap();
        display.fail_writes(1);
        let (error, pixels) = display.write_pixels_async(vec![5; 4]).unwrap_err().into_parts();
        assert!(matches!(error, DisplayError::TransferFailed(_)));
        assert_eq!(pixels.len(), 4);
        assert_eq!(display.wait_transfer_complete().unwrap(), None);
    }
}
