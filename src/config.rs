// Copyright (C) 2025 Dayton Fishell
// Tilevid Tile-Based Video Compositor
// This file is part of Tilevid.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version. See the LICENSE file in the project root for details.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tunables of the video subsystem.

use std::time::Duration;

use crate::core::geometry::{SOURCE_HEIGHT, TILE_HEIGHT};
use crate::error::VideoError;
use crate::mode::VideoDepth;

/// Video subsystem configuration.
///
/// With the `serde-config` feature the durations (de)serialize as
/// milliseconds, and [`VideoConfig::from_json`] / [`VideoConfig::from_yaml`]
/// are available.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct VideoConfig {
    /// Minimum time between two rendered frames.
    #[cfg_attr(feature = "serde-config", serde(with = "millis"))]
    pub min_frame_interval: Duration,
    /// Longest idle wait before a refresh attempt without a frame signal.
    #[cfg_attr(feature = "serde-config", serde(with = "millis"))]
    pub wait_timeout: Duration,
    /// Dirty percentage at which full-stream mode replaces tile mode.
    /// Anything above 100 keeps tile mode for every frame.
    pub full_stream_threshold_percent: u32,
    /// Source rows per full-stream band.
    pub band_rows: usize,
    /// Feed the watchdog after this many tiles in tile mode.
    pub watchdog_feed_tiles: usize,
    /// Interval between statistics reports.
    #[cfg_attr(feature = "serde-config", serde(with = "millis"))]
    pub report_interval: Duration,
    /// Depth of the boot mode.
    pub initial_depth: VideoDepth,
    /// Byte the frame buffer is cleared to at init.
    pub clear_value: u8,
}

impl VideoConfig {
    pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(42);

    pub fn with_min_frame_interval(mut self, interval: Duration) -> Self {
        self.min_frame_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_full_stream_threshold(mut self, percent: u32) -> Self {
        self.full_stream_threshold_percent = percent;
        self
    }

    pub fn with_band_rows(mut self, rows: usize) -> Self {
        self.band_rows = rows;
        self
    }

    pub fn with_initial_depth(mut self, depth: VideoDepth) -> Self {
        self.initial_depth = depth;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), VideoError> {
        if self.wait_timeout.is_zero() {
            return Err(VideoError::InvalidConfig("wait_timeout must be non-zero".into()));
        }
        if self.band_rows == 0 || SOURCE_HEIGHT % self.band_rows != 0 {
            return Err(VideoError::InvalidConfig(format!(
                "band_rows {} must evenly divide the {SOURCE_HEIGHT}-row frame",
                self.band_rows
            )));
        }
        if self.band_rows > TILE_HEIGHT {
            return Err(VideoError::InvalidConfig(format!(
                "band_rows {} exceeds the tile height {TILE_HEIGHT}",
                self.band_rows
            )));
        }
        if self.watchdog_feed_tiles == 0 {
            return Err(VideoError::InvalidConfig(
                "watchdog_feed_tiles must be non-zero".into(),
            ));
        }
        Ok(())
    }

    #[cfg(feature = "serde-config")]
    pub fn from_json(text: &str) -> Result<Self, VideoError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| VideoError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde-config")]
    pub fn from_yaml(text: &str) -> Result<Self, VideoError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| VideoError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            min_frame_interval: Self::DEFAULT_FRAME_INTERVAL,
            wait_timeout: Self::DEFAULT_FRAME_INTERVAL,
            full_stream_threshold_percent: 101,
            band_rows: 4,
            watchdog_feed_tiles: 16,
            report_interval: Duration::from_secs(5),
            initial_depth: VideoDepth::Bits8,
            clear_value: 0x80,
        }
    }
}

#[cfg(feature = "serde-config")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = VideoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wait_timeout, Duration::from_millis(42));
        assert!(config.full_stream_threshold_percent > 100);
    }

    #[test]
    fn band_rows_must_divide_the_frame() {
        let config = VideoConfig::default().with_band_rows(7);
        assert!(matches!(config.validate(), Err(VideoError::InvalidConfig(_))));
        let config = VideoConfig::default().with_band_rows(0);
        assert!(config.validate().is_err());
        let config = VideoConfig::default().with_band_rows(8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = VideoConfig::default().with_wait_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde-config")]
    #[test]
    fn loads_partial_json_and_yaml() {
        let config = VideoConfig::from_json(r#"{"min_frame_interval": 16, "band_rows": 8}"#).unwrap();
        assert_eq!(config.min_frame_interval, Duration::from_millis(16));
        assert_eq!(config.band_rows, 8);
        assert_eq!(config.wait_timeout, Duration::from_millis(42));

        let config = VideoConfig::from_yaml("full_stream_threshold_percent: 75\ninitial_depth: Bits1\n").unwrap();
        assert_eq!(config.full_stream_threshold_percent, 75);
        assert_eq!(config.initial_depth, VideoDepth::Bits1);

        assert!(VideoConfig::from_json(r#"{"band_rows": 7}"#).is_err());
    }
}
