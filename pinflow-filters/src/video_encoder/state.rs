//! Encoder Settings and Validation
//!
//! This module defines the user-facing encoder configuration. Every tuning
//! knob is optional: `None` leaves the codec's own default in place.
//!
//! ## Key Types
//! - `EncoderConfig`: rate control, keyframe placement and pass settings
//! - `PassMode`: one-pass, first (analysis) pass or last pass
//! - `EndUsage`: rate control mode
//! - `KeyframeMode`: automatic or disabled keyframe placement
//!
//! ## Validation
//! Values are range-checked by `EncoderConfig::validate()`, which the
//! encoder calls when leaving the Stopped state. A last pass requires the
//! statistics produced by a first pass.

// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

use pinflow::{Error, Result};
use serde::{Deserialize, Serialize};

/// Largest quantizer value accepted by the VPx encoders.
pub const MAX_QUANTIZER: u32 = 63;

/// Largest number of token partitions, as a power of two exponent.
pub const MAX_TOKEN_PARTITIONS: u32 = 3;

/// Which pass of a two-pass encode this is.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    /// Single pass; frames go to the output pin.
    #[default]
    OnePass,
    /// Analysis pass; statistics go to the stats sink, frames are dropped.
    FirstPass,
    /// Final pass driven by first-pass statistics.
    LastPass,
}

/// Rate control mode.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndUsage {
    /// Variable bitrate.
    Vbr,
    /// Constant bitrate.
    Cbr,
}

/// Keyframe placement mode.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KeyframeMode {
    /// Only forced keyframes are emitted.
    Disabled,
    /// The encoder places keyframes within the configured interval.
    Auto,
}

/// User-configurable settings for the video encoder.
///
/// # Examples
///
/// ```
/// use pinflow_filters::{EncoderConfig, PassMode};
///
/// let config = EncoderConfig::from_json(r#"{
///     "target_bitrate": 800,
///     "keyframe_max_interval": 30,
///     "pass_mode": "first_pass"
/// }"#).unwrap();
/// assert_eq!(config.pass_mode, PassMode::FirstPass);
/// assert_eq!(config.threads, None);
/// config.validate().unwrap();
/// ```
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Per-frame encode deadline in microseconds (0 = best quality)
    pub deadline: Option<u32>,
    pub threads: Option<u32>,
    pub error_resilient: Option<bool>,
    /// Frames the encoder may buffer before emitting output
    pub lag_in_frames: Option<u32>,
    pub dropframe_thresh: Option<u32>,
    pub resize_allowed: Option<bool>,
    pub resize_up_thresh: Option<u32>,
    pub resize_down_thresh: Option<u32>,
    pub end_usage: Option<EndUsage>,
    /// Target bitrate in kbit/s
    pub target_bitrate: Option<u32>,
    pub min_quantizer: Option<u32>,
    pub max_quantizer: Option<u32>,
    pub undershoot_pct: Option<u32>,
    pub overshoot_pct: Option<u32>,
    /// Decoder buffer model sizes in milliseconds
    pub decoder_buffer_size: Option<u32>,
    pub decoder_buffer_initial_size: Option<u32>,
    pub decoder_buffer_optimal_size: Option<u32>,
    pub keyframe_mode: Option<KeyframeMode>,
    pub keyframe_min_interval: Option<u32>,
    pub keyframe_max_interval: Option<u32>,
    pub token_partitions: Option<u32>,
    pub pass_mode: PassMode,
    /// First-pass statistics consumed by a last pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub two_pass_stats: Option<Vec<u8>>,
    pub two_pass_vbr_bias_pct: Option<u32>,
    pub two_pass_vbr_minsection_pct: Option<u32>,
    pub two_pass_vbr_maxsection_pct: Option<u32>,
    pub auto_alt_ref: Option<bool>,
    pub arnr_max_frames: Option<u32>,
    pub arnr_strength: Option<u32>,
    pub arnr_type: Option<u32>,
}

fn at_most(name: &str, value: Option<u32>, max: u32) -> Result<()> {
    match value {
        Some(v) if v > max => Err(Error::InvalidArg(format!("{name} {v} exceeds {max}"))),
        _ => Ok(()),
    }
}

fn ordered(min_name: &str, min: Option<u32>, max_name: &str, max: Option<u32>) -> Result<()> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => Err(Error::InvalidArg(format!(
            "{min_name} {lo} exceeds {max_name} {hi}"
        ))),
        _ => Ok(()),
    }
}

impl EncoderConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks ranges and cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArg`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        at_most("min_quantizer", self.min_quantizer, MAX_QUANTIZER)?;
        at_most("max_quantizer", self.max_quantizer, MAX_QUANTIZER)?;
        ordered(
            "min_quantizer",
            self.min_quantizer,
            "max_quantizer",
            self.max_quantizer,
        )?;
        at_most("undershoot_pct", self.undershoot_pct, 100)?;
        at_most("overshoot_pct", self.overshoot_pct, 100)?;
        at_most("two_pass_vbr_bias_pct", self.two_pass_vbr_bias_pct, 100)?;
        ordered(
            "two_pass_vbr_minsection_pct",
            self.two_pass_vbr_minsection_pct,
            "two_pass_vbr_maxsection_pct",
            self.two_pass_vbr_maxsection_pct,
        )?;
        at_most("token_partitions", self.token_partitions, MAX_TOKEN_PARTITIONS)?;
        ordered(
            "keyframe_min_interval",
            self.keyframe_min_interval,
            "keyframe_max_interval",
            self.keyframe_max_interval,
        )?;
        if self.pass_mode == PassMode::LastPass
            && self.two_pass_stats.as_ref().is_none_or(Vec::is_empty)
        {
            return Err(Error::InvalidArg(
                "last pass requires first-pass statistics".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = EncoderConfig::from_json("{}").unwrap();
        assert_eq!(config, EncoderConfig::default());
        assert_eq!(config.pass_mode, PassMode::OnePass);
        config.validate().unwrap();
    }

    #[test]
    fn negative_values_do_not_parse() {
        assert!(matches!(
            EncoderConfig::from_json(r#"{ "threads": -1 }"#),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn ranges_are_checked() {
        let bad = [
            EncoderConfig {
                max_quantizer: Some(64),
                ..Default::default()
            },
            EncoderConfig {
                min_quantizer: Some(40),
                max_quantizer: Some(20),
                ..Default::default()
            },
            EncoderConfig {
                overshoot_pct: Some(101),
                ..Default::default()
            },
            EncoderConfig {
                token_partitions: Some(4),
                ..Default::default()
            },
            EncoderConfig {
                keyframe_min_interval: Some(10),
                keyframe_max_interval: Some(5),
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(Error::InvalidArg(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn last_pass_needs_stats() {
        let mut config = EncoderConfig {
            pass_mode: PassMode::LastPass,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.two_pass_stats = Some(vec![1, 2, 3]);
        config.validate().unwrap();
    }
}
