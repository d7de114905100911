// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for the video subsystem and the display boundary.

use thiserror::Error;

/// Errors raised by the display controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("display operation outside of a batch")]
    NoBatch,
    #[error("window {width}x{height} at ({x}, {y}) lies outside the panel")]
    WindowOutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
    #[error("write of {count} pixels overflows the window ({remaining} left)")]
    WindowOverflow { count: usize, remaining: usize },
    #[error("an asynchronous transfer is already in flight")]
    TransferInFlight,
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

/// A rejected or failed asynchronous transfer. The buffer always comes back
/// to the caller so it can be reused without reallocating.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{error}")]
pub struct TransferError {
    pub error: DisplayError,
    pub pixels: Vec<u16>,
}

impl TransferError {
    pub fn new(error: DisplayError, pixels: Vec<u16>) -> Self {
        Self { error, pixels }
    }

    /// Split into the error and the returned buffer.
    pub fn into_parts(self) -> (DisplayError, Vec<u16>) {
        (self.error, self.pixels)
    }
}

/// Errors raised while setting up or driving the video subsystem.
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("failed to allocate {what} ({bytes} bytes)")]
    AllocationFailed { what: &'static str, bytes: usize },
    #[error("unsupported video mode: {0}")]
    InvalidMode(String),
    #[error("video mode needs {needed} bytes but the frame buffer holds {capacity}")]
    ModeTooLarge { needed: usize, capacity: usize },
    #[error("invalid video configuration: {0}")]
    InvalidConfig(String),
    #[error("render thread already started")]
    AlreadyStarted,
    #[error("render thread panicked")]
    RenderThreadPanicked,
    #[error("failed to spawn render thread")]
    Spawn(#[source] std::io::Error),
    #[cfg(feature = "serde-config")]
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
}
