//! Slenderness based height correction.
//!
//! Segmentation and cylinder detection both tend to over- or under-estimate tree heights: a stem fragment that only
//! captured the canopy top, or a segment that swallowed a neighbouring crown. The correction here is a heuristic
//! clamp of the height-to-diameter ratio, not a physical model.

use anyhow::{ensure, Result};
use sylva_core::tree::TreeRecord;

/// Thresholds of the slenderness correction
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlendernessParams {
    /// Heights with a slenderness above this value are replaced
    pub max_slenderness: f64,
    /// Slenderness of the replacement height
    pub target_slenderness: f64,
}

impl Default for SlendernessParams {
    fn default() -> Self {
        Self {
            max_slenderness: 120.0,
            target_slenderness: 90.0,
        }
    }
}

impl SlendernessParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_slenderness.is_finite() && self.max_slenderness > 0.0,
            "max_slenderness must be a positive number, got {}",
            self.max_slenderness
        );
        ensure!(
            self.target_slenderness.is_finite() && self.target_slenderness > 0.0,
            "target_slenderness must be a positive number, got {}",
            self.target_slenderness
        );
        Ok(())
    }
}

/// Height-to-diameter ratio `100 · height / dbh`, with the height in meters and the diameter in centimeters
pub fn slenderness(height_m: f64, dbh_cm: f64) -> f64 {
    100.0 * height_m / dbh_cm
}

/// Returns `raw_height_m` unless its slenderness exceeds `max_slenderness`, in which case the height is replaced by
/// `target_slenderness · dbh_cm / 100`. Without a usable diameter (zero, negative or not finite) the raw height is
/// returned unchanged.
///
/// ```
/// # use sylva_algorithms::height::correct_height;
/// // 30 m at 20 cm DBH is a slenderness of 150
/// assert_eq!(correct_height(30.0, 20.0, 120.0, 90.0), 18.0);
/// assert_eq!(correct_height(20.0, 20.0, 120.0, 90.0), 20.0);
/// ```
pub fn correct_height(
    raw_height_m: f64,
    dbh_cm: f64,
    max_slenderness: f64,
    target_slenderness: f64,
) -> f64 {
    if !dbh_cm.is_finite() || dbh_cm <= 0.0 {
        return raw_height_m;
    }
    if slenderness(raw_height_m, dbh_cm) > max_slenderness {
        target_slenderness * dbh_cm / 100.0
    } else {
        raw_height_m
    }
}

/// Rewrites `corrected_height` of every record with a DBH. `raw_height` is never touched. Returns the number of
/// records whose height changed
pub fn apply_height_correction(records: &mut [TreeRecord], params: &SlendernessParams) -> Result<usize> {
    params.validate()?;
    let mut corrected = 0;
    for record in records.iter_mut() {
        let Some(dbh_cm) = record.dbh_cm else {
            continue;
        };
        record.corrected_height = correct_height(
            record.raw_height,
            dbh_cm,
            params.max_slenderness,
            params.target_slenderness,
        );
        if record.is_height_corrected() {
            corrected += 1;
        }
    }
    log::info!(
        "Height correction: {} of {} records exceeded slenderness {}",
        corrected,
        records.len(),
        params.max_slenderness
    );
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use sylva_core::nalgebra::Vector2;

    use super::*;

    #[test]
    fn test_boundary_is_kept() {
        // slenderness of exactly 120
        assert_eq!(correct_height(24.0, 20.0, 120.0, 90.0), 24.0);
        assert_eq!(correct_height(24.01, 20.0, 120.0, 90.0), 90.0 * 20.0 / 100.0);
    }

    #[test]
    fn test_missing_diameter() {
        assert_eq!(correct_height(30.0, 0.0, 120.0, 90.0), 30.0);
        assert_eq!(correct_height(30.0, f64::NAN, 120.0, 90.0), 30.0);
    }

    #[test]
    fn test_slenderness() {
        assert_approx_eq!(slenderness(18.0, 20.0), 90.0);
    }

    #[test]
    fn test_apply_keeps_raw_height() {
        let mut records = vec![
            TreeRecord::new(0, Vector2::zeros(), 0.0, 100, 30.0, Some(20.0)),
            TreeRecord::new(1, Vector2::zeros(), 0.0, 100, 15.0, Some(20.0)),
            TreeRecord::new(2, Vector2::zeros(), 0.0, 100, 40.0, None),
        ];
        let corrected = apply_height_correction(&mut records, &SlendernessParams::default()).unwrap();
        assert_eq!(corrected, 1);
        assert_eq!(records[0].raw_height, 30.0);
        assert_approx_eq!(records[0].corrected_height, 18.0);
        assert_eq!(records[1].corrected_height, 15.0);
        assert_eq!(records[2].corrected_height, 40.0);
    }

    #[test]
    fn test_invalid_parameters() {
        let params = SlendernessParams {
            max_slenderness: 0.0,
            ..Default::default()
        };
        assert!(apply_height_correction(&mut [], &params).is_err());
    }
}
