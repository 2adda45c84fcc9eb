//! Polyline representation for route geometries.
//!
//! Routes are kept as decoded coordinate sequences. Decoding of the compact
//! encoded format happens when a routing service answers.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// A polyline representing a route geometry as decoded coordinates.
///
/// Each point is a (latitude, longitude) tuple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<(f64, f64)>,
}

impl Polyline {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Decodes an encoded polyline string.
    ///
    /// `precision` is the number of decimal places (5 for OSRM's default
    /// `geometries=polyline`, 6 for `polyline6`).
    pub fn decode(encoded: &str, precision: u32) -> Result<Self, ProviderError> {
        let factor = 10_f64.powi(precision as i32);
        let bytes = encoded.as_bytes();
        let mut points = Vec::new();
        let mut lat = 0i64;
        let mut lng = 0i64;
        let mut i = 0;

        while i < bytes.len() {
            lat += next_delta(bytes, &mut i)?;
            lng += next_delta(bytes, &mut i)?;
            points.push((lat as f64 / factor, lng as f64 / factor));
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(f64, f64)> {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Reads one zig-zag encoded varint starting at `*i`.
fn next_delta(bytes: &[u8], i: &mut usize) -> Result<i64, ProviderError> {
    let mut shift = 0;
    let mut result = 0i64;
    loop {
        let Some(&raw) = bytes.get(*i) else {
            return Err(ProviderError::Parse("truncated polyline".to_string()));
        };
        *i += 1;
        let byte = raw as i64 - 63;
        if !(0..64).contains(&byte) || shift > 60 {
            return Err(ProviderError::Parse(format!(
                "invalid polyline byte {raw:#x}"
            )));
        }
        result |= (byte & 0x1f) << shift;
        shift += 5;
        if byte < 0x20 {
            break;
        }
    }
    Ok(if result & 1 != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}
