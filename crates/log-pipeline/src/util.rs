// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsing helpers for duration and byte-size strings used in stage configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::errors::ConfigError;

const NANOS_PER_UNIT: [(&str, f64); 8] = [
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("μs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

/// Parses a duration string such as `"300ms"`, `"1.5h"` or `"2h45m"` into
/// signed seconds.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. A bare `"0"`
/// is accepted. Returns `None` for anything else.
///
/// # Examples
///
/// ```
/// use log_pipeline::util::parse_duration_secs;
///
/// assert_eq!(parse_duration_secs("0.5ms"), Some(0.0005));
/// assert_eq!(parse_duration_secs("1m30s"), Some(90.0));
/// assert_eq!(parse_duration_secs("10"), None);
/// ```
pub fn parse_duration_secs(input: &str) -> Option<f64> {
    let mut rest = input.trim();
    let negative = rest.starts_with('-');
    rest = rest.strip_prefix(['-', '+']).unwrap_or(rest);

    if rest == "0" {
        return Some(0.0);
    }
    if rest.is_empty() {
        return None;
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let (_, scale) = NANOS_PER_UNIT.iter().find(|(name, _)| *name == unit)?;
        total_nanos += number * scale;
        rest = &rest[unit_len..];
    }

    let secs = total_nanos / 1e9;
    Some(if negative { -secs } else { secs })
}

/// Parses a non-negative duration string into a [`Duration`].
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    match parse_duration_secs(input) {
        Some(secs) if secs >= 0.0 => Duration::try_from_secs_f64(secs)
            .map_err(|_| ConfigError::InvalidDuration(input.to_string())),
        _ => Err(ConfigError::InvalidDuration(input.to_string())),
    }
}

/// Parses a base-2 byte size such as `"10B"`, `"8KB"` or `"1MiB"`.
///
/// `KB` and `KiB` are both 1024 bytes. A bare number is taken as bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let invalid = || ConfigError::InvalidByteSize(input.to_string());

    let number: f64 = number.parse().map_err(|_| invalid())?;
    let shift = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 10,
        "M" | "MB" | "MIB" => 20,
        "G" | "GB" | "GIB" => 30,
        "T" | "TB" | "TIB" => 40,
        "P" | "PB" | "PIB" => 50,
        _ => return Err(invalid()),
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((number * 2f64.powi(shift)) as u64)
}

struct DurationVisitor;

impl serde::de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a duration string such as \"3s\" or \"100ms\"")
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_duration(v).map_err(E::custom)
    }
}

pub fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserializer.deserialize_str(DurationVisitor)
}

pub fn deserialize_optional_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse_duration(&raw).map_err(serde::de::Error::custom))
        .transpose()
}

pub fn deserialize_optional_byte_size<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse_byte_size(&raw).map_err(serde::de::Error::custom))
        .transpose()
}
