//! Convenience functions and utilities for ltwiss.

use crate::error::{Error, Result};

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e+8;

/// Relativistic gamma factor for a particle of the given kinetic energy
/// and rest mass (both in the same energy units, e.g. GeV).
/// ```
/// let gamma = ltwiss::gamma_from_kinetic(0.1856, 0.939294).unwrap();
/// assert!((gamma - 1.19759).abs() < 1e-5);
/// ```
pub fn gamma_from_kinetic(e_kin: f64, mass: f64) -> Result<f64> {
    if !(mass > 0.0) {
        return Err(Error::invalid(format!("rest mass {mass} must be positive")));
    }
    Ok((mass + e_kin) / mass)
}

/// Relativistic beta for a particle of the given kinetic energy and rest
/// mass, via the momentum form `p = sqrt((eKin+m)^2 - m^2)`,
/// `beta = p/(eKin+m)`.
///
/// Fails unless the result lies in (0,1), i.e. unless `e_kin > 0` and
/// `mass > 0`.
pub fn beta_from_kinetic(e_kin: f64, mass: f64) -> Result<f64> {
    if !(mass > 0.0) {
        return Err(Error::invalid(format!("rest mass {mass} must be positive")));
    }
    if !(e_kin > 0.0) || !e_kin.is_finite() {
        return Err(Error::invalid(format!(
            "kinetic energy {e_kin} must be positive and finite"
        )));
    }
    let e_total = e_kin + mass;
    let momentum = (e_total * e_total - mass * mass).sqrt();
    Ok(momentum / e_total)
}

/// Shift `phase` by multiples of 360 degrees until it lies within
/// (target-180, target+180].
/// ```
/// assert_eq!(ltwiss::phase_near_target_deg(350.0, 0.0), -10.0);
/// assert_eq!(ltwiss::phase_near_target_deg(-170.0, 175.0), 190.0);
/// ```
#[must_use] pub fn phase_near_target_deg(phase: f64, target: f64) -> f64 {
    let mut p = phase;
    while p <= target - 180.0 {
        p += 360.0;
    }
    while p > target + 180.0 {
        p -= 360.0;
    }
    p
}

/// Wrap a phase in degrees into (-180, 180].
#[must_use] pub fn wrap_phase_deg(phase: f64) -> f64 {
    phase_near_target_deg(phase, 0.0)
}

/// Kinetic energy downstream of the gap for each scan point: the initial
/// energy plus the synchronous gain `qE0TL*cos(rf_phase)` at that point.
///
/// Energies and `q_e0tl` are in the same units (e.g. GeV); phases in degrees.
#[must_use] pub fn kinetic_energies(e_kin_ini: f64, q_e0tl: f64, rf_phase_deg: &[f64]) -> Vec<f64> {
    rf_phase_deg
        .iter()
        .map(|phase| e_kin_ini + q_e0tl * phase.to_radians().cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn beta_matches_gamma_form() {
        // beta = sqrt(gamma^2 - 1)/gamma must agree with the momentum form
        let e_kin = 0.1856;
        let mass = 0.939294;
        let gamma = gamma_from_kinetic(e_kin, mass).unwrap();
        let beta = beta_from_kinetic(e_kin, mass).unwrap();
        assert_abs_diff_eq!(beta, (gamma * gamma - 1.0).sqrt() / gamma, epsilon = 1e-14);
        assert!(beta > 0.0 && beta < 1.0);
    }

    #[test]
    fn beta_rejects_nonpositive_energy() {
        assert!(beta_from_kinetic(0.0, 0.939294).is_err());
        assert!(beta_from_kinetic(-0.1, 0.939294).is_err());
        assert!(beta_from_kinetic(0.1, 0.0).is_err());
    }

    #[test]
    fn phase_wrapping() {
        assert_abs_diff_eq!(phase_near_target_deg(720.0, 0.0), 0.0);
        assert_abs_diff_eq!(phase_near_target_deg(181.0, 0.0), -179.0);
        assert_abs_diff_eq!(wrap_phase_deg(-180.0), 180.0);
        // result is always within 180 degrees of the target
        for phase in [-1000.0, -1.0, 0.0, 359.0, 12345.6] {
            for target in [-90.0, 0.0, 270.0] {
                let p = phase_near_target_deg(phase, target);
                assert!(p > target - 180.0 && p <= target + 180.0);
            }
        }
    }

    #[test]
    fn energy_accumulation() {
        let e = kinetic_energies(0.1856, 0.002, &[0.0, 90.0, 180.0]);
        assert_abs_diff_eq!(e[0], 0.1876, epsilon = 1e-12);
        assert_abs_diff_eq!(e[1], 0.1856, epsilon = 1e-12);
        assert_abs_diff_eq!(e[2], 0.1836, epsilon = 1e-12);
    }
}
