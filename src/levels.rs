// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pure level math for VU display.
//!
//! Turns raw decibel readings into normalized 0..1 values and picks the
//! jitter and smoothing that keep the meters lively at speech levels while
//! staying steady near silence. No I/O happens here.

use rand::Rng;

/// Decibel floor; anything at or below maps to 0.0.
pub const MIN_DB: f32 = -65.0;

/// Gamma exponent expanding resolution near full scale.
pub const GAMMA: f32 = 0.7;

/// Convert a dB reading to the normalized 0..1 display range.
///
/// Clamps to `[MIN_DB, 0]`, rescales linearly, then applies the gamma
/// curve. `MIN_DB` maps to exactly 0.0 and 0 dB to exactly 1.0.
pub fn db_to_normalized(db: f32) -> f32 {
    let db = db.clamp(MIN_DB, 0.0);
    let linear = (db - MIN_DB) / (0.0 - MIN_DB);
    linear.powf(GAMMA)
}

/// Apply level-dependent jitter to a stereo pair.
///
/// Returns the jittered pair plus the smoothing factor for this band.
/// Louder signal gets more jitter and less smoothing lag; quiet signal
/// stays stable. Outputs are clamped to `[0, 1]`.
pub fn apply_jitter(left: f32, right: f32, avg_level: f32) -> (f32, f32, f32) {
    let (smoothing, amplitude) = if avg_level > 0.6 {
        (0.05, 0.15)
    } else if avg_level > 0.35 {
        (0.2, 0.08)
    } else if avg_level > 0.15 {
        (0.4, 0.04)
    } else {
        (0.6, 0.0)
    };

    let (jitter_l, jitter_r) = if amplitude > 0.0 {
        let mut rng = rand::thread_rng();
        (
            rng.gen_range(-amplitude..=amplitude),
            rng.gen_range(-amplitude..=amplitude),
        )
    } else {
        (0.0, 0.0)
    };

    (
        (left + jitter_l).clamp(0.0, 1.0),
        (right + jitter_r).clamp(0.0, 1.0),
        smoothing,
    )
}

/// Exponential smoothing: `factor` of the old value, the rest of the new.
///
/// A factor of 0 snaps instantly; 1 never moves.
pub fn smooth(old: f32, new: f32, factor: f32) -> f32 {
    factor * old + (1.0 - factor) * new
}

/// Adaptive frame pacing in milliseconds.
///
/// Louder peaks refresh faster so the movement reads as live.
pub fn refresh_interval_ms(max_level: f32) -> u64 {
    if max_level > 0.7 {
        40
    } else if max_level > 0.4 {
        60
    } else {
        80
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_endpoints() {
        assert_eq!(db_to_normalized(MIN_DB), 0.0);
        assert_eq!(db_to_normalized(0.0), 1.0);
    }

    #[test]
    fn test_normalized_clamps_out_of_range() {
        assert_eq!(db_to_normalized(-120.0), 0.0);
        assert_eq!(db_to_normalized(6.0), 1.0);
    }

    #[test]
    fn test_normalized_monotonic() {
        let mut previous = 0.0;
        let mut db = MIN_DB;
        while db <= 0.0 {
            let value = db_to_normalized(db);
            assert!(value >= previous, "dropped at {} dB", db);
            previous = value;
            db += 0.5;
        }
    }

    #[test]
    fn test_gamma_expands_high_end() {
        // Halfway in dB should land above the linear midpoint.
        assert!(db_to_normalized(MIN_DB / 2.0) > 0.5);
    }

    #[test]
    fn test_smooth_blends() {
        assert_eq!(smooth(1.0, 0.0, 0.75), 0.75);
        assert_eq!(smooth(0.0, 1.0, 0.0), 1.0);
        assert_eq!(smooth(0.5, 1.0, 1.0), 0.5);
    }

    #[test]
    fn test_jitter_bands_pick_smoothing() {
        assert_eq!(apply_jitter(0.8, 0.8, 0.8).2, 0.05);
        assert_eq!(apply_jitter(0.5, 0.5, 0.5).2, 0.2);
        assert_eq!(apply_jitter(0.2, 0.2, 0.2).2, 0.4);
        assert_eq!(apply_jitter(0.1, 0.1, 0.1).2, 0.6);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..200 {
            let (left, right, _) = apply_jitter(0.95, 0.05, 0.9);
            assert!((0.0..=1.0).contains(&left));
            assert!((0.0..=1.0).contains(&right));
        }
    }

    #[test]
    fn test_quiet_band_has_no_jitter() {
        let (left, right, _) = apply_jitter(0.1, 0.05, 0.1);
        assert_eq!(left, 0.1);
        assert_eq!(right, 0.05);
    }

    #[test]
    fn test_refresh_tiers() {
        assert_eq!(refresh_interval_ms(0.9), 40);
        assert_eq!(refresh_interval_ms(0.5), 60);
        assert_eq!(refresh_interval_ms(0.1), 80);
    }
}
