use crate::error::{Error, Result};
use crate::linalg::Mat2;
use crate::utils::SPEED_OF_LIGHT;
use std::f64::consts::TAU;
use std::ops;

/// Longitudinal phase-space coordinate pair `(z, dE)`: position offset
/// along the bunch in metres, energy offset in GeV.
///
/// `z > 0` means ahead of the synchronous particle (it arrives at a
/// downstream plane earlier), `dE > 0` means more energetic. A transport
/// map acts on this pair by left-multiplication.
/// # Examples
/// ```
/// use ltwiss::{Mat2, PhaseVec2};
/// let state = PhaseVec2::new(0.001, 0.0005);
/// let drift = Mat2::new(1.0, 2.0, 0.0, 1.0);
/// let out = drift * state;
/// assert_eq!(out, PhaseVec2::new(0.002, 0.0005));
/// let sum = out + PhaseVec2::new(0.001, 0.0);
/// assert_eq!(sum.z, 0.003);
/// ```
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct PhaseVec2 {
    /// longitudinal position offset in metres
    pub z: f64,
    /// energy offset in GeV
    pub de: f64,
}

impl PhaseVec2 {
    pub fn new(z: f64, de: f64) -> Self {
        Self { z, de }
    }
}

impl_op_ex!(* |a: &Mat2, b: &PhaseVec2| -> PhaseVec2 {
    PhaseVec2 {
        z:  a.get(0,0)*b.z + a.get(0,1)*b.de,
        de: a.get(1,0)*b.z + a.get(1,1)*b.de,
    }
});
impl_op_ex!(+ |a: &PhaseVec2, b: &PhaseVec2| -> PhaseVec2 {
    PhaseVec2 { z: a.z + b.z, de: a.de + b.de }
});
impl_op_ex!(- |a: &PhaseVec2, b: &PhaseVec2| -> PhaseVec2 {
    PhaseVec2 { z: a.z - b.z, de: a.de - b.de }
});
impl_op_ex_commutative!(* |a: &PhaseVec2, b: &f64| -> PhaseVec2 {
    PhaseVec2 { z: a.z * b, de: a.de * b }
});

fn check_beta(beta: f64) -> Result<()> {
    if !(beta > 0.0 && beta < 1.0) {
        return Err(Error::invalid(format!(
            "relativistic beta {beta} outside (0,1)"
        )));
    }
    Ok(())
}

/// Longitudinal map of a thin accelerating gap,
/// `(z, dE) -> (z, dE + k*z)`.
///
/// The gap leaves `z` unchanged and imparts an energy kick
/// `qE0TL*cos(phase)` whose dependence on arrival time is linearized to
/// first order around the synchronous phase:
/// `k = qE0TL * sin(phase) * 2*pi*f / (beta*c)`.
/// The linearization is what restricts the model to a single gap with a
/// small phase spread across the bunch.
///
/// `q_e0tl` is the integrated gap voltage in GeV, `rf_frequency` in Hz,
/// `rf_phase_deg` in degrees of the `dE = qE0TL*cos(phase)` convention.
pub fn rf_gap_matrix(
    q_e0tl: f64,
    rf_frequency: f64,
    beta: f64,
    rf_phase_deg: f64,
) -> Result<Mat2> {
    check_beta(beta)?;
    if !(rf_frequency > 0.0) {
        return Err(Error::invalid(format!(
            "rf frequency {rf_frequency} must be positive"
        )));
    }
    let k = q_e0tl * rf_phase_deg.to_radians().sin() * TAU * rf_frequency
        / (beta * SPEED_OF_LIGHT);
    Ok(Mat2::new(1.0, 0.0, k, 1.0))
}

/// Longitudinal map of a field-free drift of `length` metres,
/// `(z, dE) -> (z + d*dE, dE)`.
///
/// A particle with energy offset `dE` slips relative to the synchronous
/// particle at a rate set by the longitudinal dispersion of the drift:
/// `d = L / (gamma^3 * beta^2 * mass)`, with `mass` in GeV. Higher-energy
/// particles advance.
pub fn drift_matrix(length: f64, beta: f64, mass: f64) -> Result<Mat2> {
    check_beta(beta)?;
    if !(mass > 0.0) {
        return Err(Error::invalid(format!("rest mass {mass} must be positive")));
    }
    if !(length >= 0.0) {
        return Err(Error::invalid(format!(
            "drift length {length} must be non-negative"
        )));
    }
    let gamma = 1.0 / (1.0 - beta * beta).sqrt();
    let d = length / (gamma.powi(3) * beta * beta * mass);
    Ok(Mat2::new(1.0, d, 0.0, 1.0))
}

/// Transport matrix of one "thin gap + drift" stage:
/// `(z, dE)_exit = M * (z, dE)_entrance` with `M = drift * gap`.
/// The gap acts first, the drift second; the multiplication order matters.
///
/// The resulting map is area-preserving (`det M == 1`).
/// # Examples
/// ```
/// let m = ltwiss::transport_matrix(
///     0.002,     // qE0TL, GeV
///     805.0e+6,  // RF frequency, Hz
///     0.55,      // relativistic beta
///     -30.0,     // RF phase, degrees
///     3.5,       // drift length, m
///     0.939294,  // mass, GeV
/// ).unwrap();
/// assert!((m.det() - 1.0).abs() < 1e-12);
/// ```
pub fn transport_matrix(
    q_e0tl: f64,
    rf_frequency: f64,
    beta: f64,
    rf_phase_deg: f64,
    drift_length: f64,
    mass: f64,
) -> Result<Mat2> {
    let gap = rf_gap_matrix(q_e0tl, rf_frequency, beta, rf_phase_deg)?;
    let drift = drift_matrix(drift_length, beta, mass)?;
    Ok(drift * gap)
}

/// Calibrated parameters of the single gap+drift stage between the
/// cavity and the BPM. Everything except the per-sample `(beta, phase)`
/// pair is fixed for a scan.
#[derive(Debug,Clone)]
pub struct GapDrift {
    /// integrated gap voltage qE0TL in GeV
    pub q_e0tl: f64,
    /// cavity RF frequency in Hz
    pub rf_frequency: f64,
    /// cavity-to-BPM drift length in m
    pub drift_length: f64,
    /// particle rest mass in GeV
    pub mass: f64,
}

impl GapDrift {
    /// Fail fast on the parameters that do not depend on the sample.
    pub fn validate(&self) -> Result<()> {
        if !(self.rf_frequency > 0.0) {
            return Err(Error::invalid(format!(
                "rf frequency {} must be positive", self.rf_frequency
            )));
        }
        if !(self.mass > 0.0) {
            return Err(Error::invalid(format!(
                "rest mass {} must be positive", self.mass
            )));
        }
        if !(self.drift_length >= 0.0) {
            return Err(Error::invalid(format!(
                "drift length {} must be non-negative", self.drift_length
            )));
        }
        Ok(())
    }

    /// Full transport matrix for one scan sample.
    pub fn matrix(&self, beta: f64, rf_phase_deg: f64) -> Result<Mat2> {
        transport_matrix(
            self.q_e0tl,
            self.rf_frequency,
            beta,
            rf_phase_deg,
            self.drift_length,
            self.mass,
        )
    }

    /// The `(z, dE) -> z_exit` row of the transport matrix, assuming the
    /// caller already validated `beta` and the stage parameters.
    pub(crate) fn first_row_unchecked(&self, beta: f64, rf_phase_deg: f64) -> (f64, f64) {
        let gamma = 1.0 / (1.0 - beta * beta).sqrt();
        let k = self.q_e0tl * rf_phase_deg.to_radians().sin() * TAU * self.rf_frequency
            / (beta * SPEED_OF_LIGHT);
        let d = self.drift_length / (gamma.powi(3) * beta * beta * self.mass);
        (1.0 + d * k, d)
    }
}
