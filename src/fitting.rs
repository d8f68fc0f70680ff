use crate::error::{Error, Result};
use crate::linalg::lstsq_3;
use crate::utils::{
    beta_from_kinetic, gamma_from_kinetic, phase_near_target_deg, SPEED_OF_LIGHT,
};
use std::f64::consts::TAU;

/// Result of fitting `bpm_phase = A*cos(cav_phase + phi0) + offset` to a
/// phase scan (one cycle of BPM phase per cycle of cavity phase).
///
/// The measured BPM phases may be angle-wrapped into (-180, 180]; the fit
/// re-unwraps each point to the 360-degree equivalent nearest the fitted
/// curve and keeps the wrap assignment with the smallest total squared
/// residual, since a cosine fit is ambiguous under 360-degree shifts.
#[derive(Debug,Clone)]
pub struct CosineFit {
    /// fitted modulation amplitude A in degrees of BPM phase
    pub amplitude: f64,
    /// fitted phase offset phi0 in degrees, in (-180, 180]
    pub phase_offset_deg: f64,
    /// fitted constant offset in degrees of BPM phase
    pub offset: f64,
    /// the fitted curve evaluated at each input cavity phase
    pub fitted: Vec<f64>,
    /// measured minus fitted at each point, after unwrapping
    pub residuals: Vec<f64>,
}

/// One converged wrap assignment: total squared residual, linear solution
/// `(a, b, c)`, unwrapped measurements, fitted curve.
type WrapCandidate = (f64, [f64; 3], Vec<f64>, Vec<f64>);

impl CosineFit {
    /// Fit the cosine model to `(cavity phase, BPM phase)` pairs, both in
    /// degrees.
    ///
    /// Fails with [Error::FitDidNotConverge] when fewer than 3 distinct
    /// cavity phases are supplied, or when the fitted amplitude is not
    /// significantly above the residual noise floor (a flat scan).
    pub fn fit(points: &[(f64, f64)]) -> Result<Self> {
        let n = points.len();
        if points.iter().any(|&(cav, bpm)| !cav.is_finite() || !bpm.is_finite()) {
            return Err(Error::invalid("scan phases must be finite"));
        }
        if distinct_angles(points) < 3 {
            return Err(Error::FitDidNotConverge(
                "fewer than 3 distinct cavity phases".into(),
            ));
        }
        let rows: Vec<[f64; 3]> = points
            .iter()
            .map(|&(cav, _)| {
                let x = cav.to_radians();
                [x.cos(), x.sin(), 1.0]
            })
            .collect();

        // The wrap assignment is ambiguous before a curve exists, so the
        // fit is started from several candidate unwrap centres and the
        // assignment with the smallest total squared residual wins.
        let mut best = refine_wraps(points, &rows, 0.0)?;
        for centre in [90.0, 180.0, -90.0] {
            let candidate = refine_wraps(points, &rows, centre)?;
            if candidate.0 < best.0 {
                best = candidate;
            }
        }
        let (ssr, [a, b, c], y, fitted) = best;

        let amplitude = (a * a + b * b).sqrt();
        // a flat scan fits amplitude ~ 0 with the residuals carrying all
        // of the signal; reject when A is within the noise on A itself
        let rms_residual = (ssr / n as f64).sqrt();
        let amplitude_noise = rms_residual * (2.0 / n as f64).sqrt();
        if !amplitude.is_finite() || amplitude <= 3.0 * amplitude_noise {
            return Err(Error::FitDidNotConverge(format!(
                "fitted amplitude {amplitude:.3e} indistinguishable from zero"
            )));
        }
        let residuals = y
            .iter()
            .zip(fitted.iter())
            .map(|(yi, fi)| yi - fi)
            .collect();
        Ok(Self {
            amplitude,
            phase_offset_deg: (-b).atan2(a).to_degrees(),
            offset: c,
            fitted,
            residuals,
        })
    }

    /// Calibration constant translating a cavity control phase into the
    /// RF phase of the `dE = qE0TL*cos(phase)` transport convention. The
    /// two conventions differ by a hardware-dependent offset that can
    /// only be read off the scan shape, 180 degrees away from the fitted
    /// cosine crest.
    pub fn rf_phase_offset_deg(&self) -> f64 {
        self.phase_offset_deg + 180.0
    }

    /// Translate cavity control phases into transport RF phases.
    pub fn rf_phases_deg(&self, cav_phase_deg: &[f64]) -> Vec<f64> {
        let offset = self.rf_phase_offset_deg();
        cav_phase_deg.iter().map(|p| p + offset).collect()
    }
}

/// Iterate fit / re-unwrap-to-fit until the wrap assignment is stable,
/// starting from measurements unwrapped towards `centre`.
fn refine_wraps(
    points: &[(f64, f64)],
    rows: &[[f64; 3]],
    centre: f64,
) -> Result<WrapCandidate> {
    let mut y: Vec<f64> = points
        .iter()
        .map(|&(_, bpm)| phase_near_target_deg(bpm, centre))
        .collect();
    let mut sol = [0.0; 3];
    let mut fitted = vec![0.0; points.len()];
    for _ in 0..32 {
        sol = lstsq_3(rows, &y).map_err(degenerate_scan)?;
        fitted = rows
            .iter()
            .map(|r| r[0]*sol[0] + r[1]*sol[1] + r[2]*sol[2])
            .collect();
        let unwrapped: Vec<f64> = points
            .iter()
            .zip(fitted.iter())
            .map(|(&(_, bpm), &fit)| phase_near_target_deg(bpm, fit))
            .collect();
        if unwrapped == y {
            break;
        }
        y = unwrapped;
    }
    let ssr: f64 = y
        .iter()
        .zip(fitted.iter())
        .map(|(yi, fi)| (yi - fi) * (yi - fi))
        .sum();
    Ok((ssr, sol, y, fitted))
}

fn degenerate_scan(e: Error) -> Error {
    match e {
        Error::UnderdeterminedSystem(msg) => Error::FitDidNotConverge(msg),
        other => other,
    }
}

fn distinct_angles(points: &[(f64, f64)]) -> usize {
    let mut angles: Vec<f64> = points
        .iter()
        .map(|&(cav, _)| phase_near_target_deg(cav, 0.0))
        .collect();
    angles.sort_by(f64::total_cmp);
    let mut count = 0;
    let mut last = f64::NEG_INFINITY;
    for angle in angles {
        if (angle - last).abs() > 1e-9 {
            count += 1;
        }
        last = angle;
    }
    count
}

/// Gap voltage qE0TL (GeV) implied by the fitted BPM phase-modulation
/// amplitude.
///
/// The cavity modulates the bunch energy by `qE0TL` over a scan cycle;
/// over the drift to the BPM that energy modulation becomes a
/// time-of-flight modulation, seen by the BPM electronics as a phase
/// modulation of amplitude
/// `A = qE0TL * 2*pi*f_bpm*L / (c * beta^3*gamma^3*mass)`.
/// Inverting that relation gives one scan-only estimate of qE0TL; a
/// separately measured cavity voltage curve, when available, takes
/// precedence.
pub fn q_e0tl_from_phase_modulation(
    amplitude_deg: f64,
    e_kin: f64,
    mass: f64,
    bpm_frequency: f64,
    drift_length: f64,
) -> Result<f64> {
    let beta = beta_from_kinetic(e_kin, mass)?;
    let gamma = gamma_from_kinetic(e_kin, mass)?;
    if !(bpm_frequency > 0.0) {
        return Err(Error::invalid(format!(
            "bpm frequency {bpm_frequency} must be positive"
        )));
    }
    if !(drift_length > 0.0) {
        return Err(Error::invalid(format!(
            "drift length {drift_length} must be positive"
        )));
    }
    let dispersion = TAU * bpm_frequency * drift_length
        / (SPEED_OF_LIGHT * beta.powi(3) * gamma.powi(3) * mass);
    Ok(amplitude_deg.to_radians() / dispersion)
}
