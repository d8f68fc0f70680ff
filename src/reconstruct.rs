use crate::error::{Error, Result};
use crate::fitting::CosineFit;
use crate::linalg::{lstsq_3, Matrix};
use crate::scan::{BpmSizeModel, PhaseScan, ScanSample, SizeEstimate};
use crate::transport::GapDrift;
use crate::utils::{beta_from_kinetic, kinetic_energies};
use std::fmt;

/// Second moments of the bunch distribution in `(z, dE)` phase space at
/// the cavity entrance: `<z^2>` in m^2, `<z.dE>` in m*GeV, `<dE^2>` in
/// GeV^2.
///
/// A valid second-moment matrix is positive-semidefinite,
/// `<z^2><dE^2> - <z.dE>^2 >= 0`; a fit that violates this is reported
/// through [Error::PhysicallyInconsistentFit], never clamped.
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct CorrelationMatrix {
    /// `<z^2>` in m^2
    pub z2: f64,
    /// `<z.dE>` in m*GeV
    pub z_de: f64,
    /// `<dE^2>` in GeV^2
    pub de2: f64,
}

impl CorrelationMatrix {
    pub fn new(z2: f64, z_de: f64, de2: f64) -> Self {
        Self { z2, z_de, de2 }
    }
    /// `<z^2><dE^2> - <z.dE>^2`, the squared emittance.
    pub fn discriminant(&self) -> f64 {
        self.z2 * self.de2 - self.z_de * self.z_de
    }
    /// Whether the triple is a valid (positive-semidefinite) set of
    /// second moments.
    pub fn is_physical(&self) -> bool {
        self.discriminant() >= 0.0 && self.z2 >= 0.0 && self.de2 >= 0.0
    }
}

/// Twiss parameters of the longitudinal phase-space ellipse:
/// orientation (`alpha`, dimensionless), envelope (`beta`, in m/GeV),
/// and area (`emittance`, in m*GeV; smaller is a tighter beam).
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct Twiss {
    pub alpha: f64,
    pub beta: f64,
    pub emittance: f64,
}

impl Twiss {
    /// Derive Twiss parameters from the second moments:
    /// `emittance = sqrt(<z^2><dE^2> - <z.dE>^2)`,
    /// `beta = <z^2>/emittance`, `alpha = -<z.dE>/emittance`.
    ///
    /// The correlation matrix must be strictly positive-definite (the
    /// ellipse must have finite, non-zero area); anything else is a
    /// [Error::PhysicallyInconsistentFit] carrying the offending triple.
    pub fn from_correlations(correlations: &CorrelationMatrix) -> Result<Self> {
        let discriminant = correlations.discriminant();
        if !correlations.is_physical() || discriminant <= 0.0 {
            return Err(Error::PhysicallyInconsistentFit {
                correlations: *correlations,
                discriminant,
            });
        }
        let emittance = discriminant.sqrt();
        Ok(Self {
            alpha: -correlations.z_de / emittance,
            beta: correlations.z2 / emittance,
            emittance,
        })
    }
}

#[derive(Debug,Clone)]
struct RowSeed {
    beta: f64,
    rf_phase_deg: f64,
}

/// Least-squares system relating the measured mean-square sizes at the
/// BPM to the three unknown second moments at the cavity entrance.
///
/// Row `i` is built from the `(z, dE) -> z_exit` row `[m1, m2]` of that
/// sample's transport matrix as `[m1^2, 2*m1*m2, m2^2]`, since second
/// moments propagate through a linear map as
/// `size^2_exit = m1^2*<z^2> + 2*m1*m2*<z.dE> + m2^2*<dE^2>`
/// (exact under the thin-gap linearization). The paired target vector
/// holds the measured sizes.
///
/// Like every matrix in this crate the system is evaluated lazily: the
/// elements are computed when requested (and every time they are
/// requested).
#[derive(Debug,Clone)]
pub struct LsqSystem {
    stage: GapDrift,
    seeds: Vec<RowSeed>,
    targets: Vec<f64>,
    /// index of each usable row in the original sample slice
    source_indices: Vec<usize>,
}

impl LsqSystem {
    /// Build the system for one calibrated scan.
    ///
    /// `rf_phase_offset_deg` translates each sample's cavity control
    /// phase into the transport-model RF phase (see
    /// [CosineFit::rf_phase_offset_deg]). Samples whose size estimate is
    /// [SizeEstimate::BelowResolution] are excluded, not zero-filled;
    /// fewer than 3 surviving samples is an
    /// [Error::UnderdeterminedSystem].
    pub fn new(
        stage: &GapDrift,
        rf_phase_offset_deg: f64,
        samples: &[ScanSample],
        sizes: &[SizeEstimate],
    ) -> Result<Self> {
        stage.validate()?;
        if samples.len() != sizes.len() {
            return Err(Error::invalid(format!(
                "{} samples with {} size estimates",
                samples.len(),
                sizes.len()
            )));
        }
        let mut seeds = Vec::new();
        let mut targets = Vec::new();
        let mut source_indices = Vec::new();
        for (index, (sample, size)) in samples.iter().zip(sizes.iter()).enumerate() {
            let Some(ms_size) = size.resolved() else {
                continue;
            };
            let beta = beta_from_kinetic(sample.e_kin, stage.mass).map_err(at_sample(index))?;
            seeds.push(RowSeed {
                beta,
                rf_phase_deg: sample.cav_phase_deg + rf_phase_offset_deg,
            });
            targets.push(ms_size);
            source_indices.push(index);
        }
        if seeds.len() < 3 {
            return Err(Error::UnderdeterminedSystem(format!(
                "{} usable samples, need at least 3",
                seeds.len()
            )));
        }
        Ok(Self {
            stage: stage.clone(),
            seeds,
            targets,
            source_indices,
        })
    }

    /// Measured mean-square sizes, one per usable sample.
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// Index of each row in the original sample slice (sentinel samples
    /// leave gaps).
    pub fn source_indices(&self) -> &[usize] {
        &self.source_indices
    }

    /// Solve for the second moments at the cavity entrance and derive
    /// the Twiss parameters.
    ///
    /// Least squares by Householder QR; an unphysical solution (negative
    /// emittance discriminant) is returned inside
    /// [Error::PhysicallyInconsistentFit] together with the diagnostic,
    /// leaving the discard-or-flag decision to the caller.
    pub fn solve(&self) -> Result<(CorrelationMatrix, Twiss)> {
        let rows: Vec<[f64; 3]> = self
            .seeds
            .iter()
            .map(|seed| row_from_first_row(&self.stage, seed))
            .collect();
        let x = lstsq_3(&rows, &self.targets)?;
        let correlations = CorrelationMatrix::new(x[0], x[1], x[2]);
        let twiss = Twiss::from_correlations(&correlations)?;
        Ok((correlations, twiss))
    }
}

fn row_from_first_row(stage: &GapDrift, seed: &RowSeed) -> [f64; 3] {
    let (m1, m2) = stage.first_row_unchecked(seed.beta, seed.rf_phase_deg);
    [m1 * m1, 2.0 * m1 * m2, m2 * m2]
}

impl Matrix for LsqSystem {
    fn nrows(&self) -> usize {
        self.seeds.len()
    }
    fn ncols(&self) -> usize {
        3
    }
    fn eval(&self, row_index: usize, col_index: usize) -> f64 {
        row_from_first_row(&self.stage, &self.seeds[row_index])[col_index]
    }
}

impl fmt::Display for LsqSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.format(f)
    }
}

fn at_sample(index: usize) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::InvalidPhysicalParameter(msg) => {
            Error::InvalidPhysicalParameter(format!("sample {index}: {msg}"))
        }
        other => other,
    }
}

/// Constants of the measurement setup, as known before the scan: RF and
/// BPM frequencies in Hz, cavity-to-BPM drift length in m, particle rest
/// mass and initial kinetic energy in GeV.
#[derive(Debug,Clone)]
pub struct Beamline {
    pub rf_frequency: f64,
    pub bpm_frequency: f64,
    pub drift_length: f64,
    pub mass: f64,
    pub e_kin_ini: f64,
}

/// Full output of one reconstruction: the second moments and Twiss
/// parameters at the cavity entrance, plus the diagnostics a caller
/// needs to judge the scan (cosine-fit curve and residuals, per-sample
/// size estimates, usable-sample count).
#[derive(Debug,Clone)]
pub struct Reconstruction {
    pub correlations: CorrelationMatrix,
    pub twiss: Twiss,
    pub fit: CosineFit,
    pub sizes: Vec<SizeEstimate>,
    pub samples_used: usize,
}

/// Reconstruct the longitudinal Twiss parameters at the cavity entrance
/// from one phase-scan campaign.
///
/// Runs the full pipeline: harmonic fit of the BPM phases (calibrating
/// the control-to-RF phase offset), per-sample energy accumulation,
/// amplitude-to-size conversion, least-squares system build, and solve.
/// `q_e0tl` is the calibrated integrated gap voltage in GeV (see
/// [crate::fitting::q_e0tl_from_phase_modulation] for the scan-only
/// estimate).
pub fn reconstruct(
    scan: &PhaseScan,
    beamline: &Beamline,
    q_e0tl: f64,
) -> Result<Reconstruction> {
    let fit = CosineFit::fit(&scan.phase_points())?;
    let rf_phases = fit.rf_phases_deg(scan.cav_phase_deg());
    let e_kins = kinetic_energies(beamline.e_kin_ini, q_e0tl, &rf_phases);
    let samples = scan.samples(&e_kins)?;

    let size_model = BpmSizeModel::new(beamline.bpm_frequency)?;
    let mut sizes = Vec::with_capacity(samples.len());
    for (index, sample) in samples.iter().enumerate() {
        let beta = beta_from_kinetic(sample.e_kin, beamline.mass).map_err(at_sample(index))?;
        let estimate = size_model
            .mean_square_size(sample.bpm_amplitude, beta)
            .map_err(at_sample(index))?;
        sizes.push(estimate);
    }

    let stage = GapDrift {
        q_e0tl,
        rf_frequency: beamline.rf_frequency,
        drift_length: beamline.drift_length,
        mass: beamline.mass,
    };
    let system = LsqSystem::new(&stage, fit.rf_phase_offset_deg(), &samples, &sizes)?;
    let samples_used = system.nrows();
    let (correlations, twiss) = system.solve()?;
    Ok(Reconstruction {
        correlations,
        twiss,
        fit,
        sizes,
        samples_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SPEED_OF_LIGHT;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::TAU;

    const MASS: f64 = 0.939294; // GeV
    const E_KIN_INI: f64 = 0.1856; // GeV
    const RF_FREQUENCY: f64 = 805.0e+6; // Hz
    const BPM_FREQUENCY: f64 = 402.5e+6; // Hz
    const DRIFT_LENGTH: f64 = 3.5; // m
    const Q_E0TL: f64 = 0.002; // GeV

    fn stage() -> GapDrift {
        GapDrift {
            q_e0tl: Q_E0TL,
            rf_frequency: RF_FREQUENCY,
            drift_length: DRIFT_LENGTH,
            mass: MASS,
        }
    }

    /// samples at the given cavity phases with zero phase offset, plus
    /// targets propagated from a known correlation triple
    fn synthetic_system(
        truth: &CorrelationMatrix,
        cav_phases: &[f64],
    ) -> (Vec<ScanSample>, Vec<SizeEstimate>) {
        let stage = stage();
        let e_kins = kinetic_energies(E_KIN_INI, Q_E0TL, cav_phases);
        let samples: Vec<ScanSample> = cav_phases
            .iter()
            .zip(e_kins.iter())
            .map(|(&cav, &e_kin)| ScanSample {
                cav_phase_deg: cav,
                bpm_phase_deg: 0.0,
                bpm_amplitude: 0.5,
                e_kin,
            })
            .collect();
        let sizes: Vec<SizeEstimate> = samples
            .iter()
            .map(|s| {
                let beta = beta_from_kinetic(s.e_kin, MASS).unwrap();
                let m = stage.matrix(beta, s.cav_phase_deg).unwrap();
                let (m1, m2) = m.first_row();
                SizeEstimate::Resolved(
                    m1 * m1 * truth.z2 + 2.0 * m1 * m2 * truth.z_de + m2 * m2 * truth.de2,
                )
            })
            .collect();
        (samples, sizes)
    }

    #[test]
    fn round_trip_recovers_correlations() {
        let truth = CorrelationMatrix::new(4.0, 1.0, 2.0);
        let cav_phases: Vec<f64> = (0..7).map(|i| -90.0 + i as f64 * 30.0).collect();
        let (samples, sizes) = synthetic_system(&truth, &cav_phases);
        let system = LsqSystem::new(&stage(), 0.0, &samples, &sizes).unwrap();
        let (correlations, twiss) = system.solve().unwrap();
        assert_relative_eq!(correlations.z2, truth.z2, max_relative = 1e-9);
        assert_relative_eq!(correlations.z_de, truth.z_de, max_relative = 1e-9);
        assert_relative_eq!(correlations.de2, truth.de2, max_relative = 1e-9);
        assert_relative_eq!(twiss.emittance, 7.0_f64.sqrt(), max_relative = 1e-9);
        assert_relative_eq!(twiss.beta, 4.0 / 7.0_f64.sqrt(), max_relative = 1e-9);
        assert_relative_eq!(twiss.alpha, -1.0 / 7.0_f64.sqrt(), max_relative = 1e-9);
    }

    #[test]
    fn lazy_rows_match_transport_first_row() {
        let truth = CorrelationMatrix::new(4.0, 1.0, 2.0);
        let cav_phases = [-60.0, -20.0, 20.0, 60.0];
        let (samples, sizes) = synthetic_system(&truth, &cav_phases);
        let system = LsqSystem::new(&stage(), 0.0, &samples, &sizes).unwrap();
        assert_eq!(system.nrows(), 4);
        assert_eq!(system.ncols(), 3);
        for (i, sample) in samples.iter().enumerate() {
            let beta = beta_from_kinetic(sample.e_kin, MASS).unwrap();
            let m = stage().matrix(beta, sample.cav_phase_deg).unwrap();
            let (m1, m2) = m.first_row();
            assert_abs_diff_eq!(system.eval(i, 0), m1 * m1, epsilon = 1e-15);
            assert_abs_diff_eq!(system.eval(i, 1), 2.0 * m1 * m2, epsilon = 1e-15);
            assert_abs_diff_eq!(system.eval(i, 2), m2 * m2, epsilon = 1e-15);
        }
    }

    #[test]
    fn inconsistent_targets_are_reported_not_clamped() {
        // discriminant 1*1 - 5^2 < 0: no valid beam has these moments,
        // but every target is still positive so the system looks sane
        let unphysical = CorrelationMatrix::new(1.0, 5.0, 1.0);
        let cav_phases: Vec<f64> = (0..6).map(|i| -75.0 + i as f64 * 30.0).collect();
        let (samples, sizes) = synthetic_system(&unphysical, &cav_phases);
        assert!(sizes.iter().all(|s| s.resolved().unwrap() > 0.0));
        let system = LsqSystem::new(&stage(), 0.0, &samples, &sizes).unwrap();
        match system.solve() {
            Err(Error::PhysicallyInconsistentFit {
                correlations,
                discriminant,
            }) => {
                assert!(discriminant < 0.0);
                assert_relative_eq!(correlations.z_de, 5.0, max_relative = 1e-6);
            }
            other => panic!("expected PhysicallyInconsistentFit, got {other:?}"),
        }
    }

    #[test]
    fn two_usable_samples_is_underdetermined() {
        let truth = CorrelationMatrix::new(4.0, 1.0, 2.0);
        let (samples, mut sizes) = synthetic_system(&truth, &[-60.0, 0.0, 60.0, 120.0]);
        sizes[1] = SizeEstimate::BelowResolution;
        sizes[3] = SizeEstimate::BelowResolution;
        assert!(matches!(
            LsqSystem::new(&stage(), 0.0, &samples, &sizes),
            Err(Error::UnderdeterminedSystem(_))
        ));
    }

    #[test]
    fn sentinel_samples_are_excluded_not_zero_filled() {
        let truth = CorrelationMatrix::new(4.0, 1.0, 2.0);
        let cav_phases = [-60.0, -20.0, 20.0, 60.0, 100.0];
        let (samples, mut sizes) = synthetic_system(&truth, &cav_phases);
        sizes[2] = SizeEstimate::BelowResolution;
        let system = LsqSystem::new(&stage(), 0.0, &samples, &sizes).unwrap();
        assert_eq!(system.nrows(), 4);
        assert_eq!(system.source_indices(), &[0, 1, 3, 4]);
        let (correlations, _) = system.solve().unwrap();
        assert_relative_eq!(correlations.z2, truth.z2, max_relative = 1e-9);
    }

    #[test]
    fn twiss_from_degenerate_ellipse_is_rejected() {
        // zero-area ellipse: discriminant exactly 0
        let flat = CorrelationMatrix::new(4.0, 2.0, 1.0);
        assert_abs_diff_eq!(flat.discriminant(), 0.0);
        assert!(flat.is_physical());
        assert!(matches!(
            Twiss::from_correlations(&flat),
            Err(Error::PhysicallyInconsistentFit { .. })
        ));
    }

    #[test]
    fn end_to_end_reconstruction() {
        let beamline = Beamline {
            rf_frequency: RF_FREQUENCY,
            bpm_frequency: BPM_FREQUENCY,
            drift_length: DRIFT_LENGTH,
            mass: MASS,
            e_kin_ini: E_KIN_INI,
        };
        let truth = CorrelationMatrix::new(1.0e-4, 1.5e-6, 1.0e-7);
        let phi0_true = 30.0;
        let stage = stage();

        let cav_phases: Vec<f64> = (0..15).map(|i| i as f64 * 24.0).collect();
        let bpm_phases: Vec<f64> = cav_phases
            .iter()
            .map(|cav| 25.0 * (cav + phi0_true).to_radians().cos() + 10.0)
            .collect();
        let rf_phases: Vec<f64> = cav_phases.iter().map(|c| c + phi0_true + 180.0).collect();
        let e_kins = kinetic_energies(E_KIN_INI, Q_E0TL, &rf_phases);
        let amplitudes: Vec<f64> = rf_phases
            .iter()
            .zip(e_kins.iter())
            .map(|(&rf, &e_kin)| {
                let beta = beta_from_kinetic(e_kin, MASS).unwrap();
                let m = stage.matrix(beta, rf).unwrap();
                let (m1, m2) = m.first_row();
                let ms = m1 * m1 * truth.z2 + 2.0 * m1 * m2 * truth.z_de + m2 * m2 * truth.de2;
                let phase_per_metre = TAU * BPM_FREQUENCY / (beta * SPEED_OF_LIGHT);
                (-0.5 * ms * phase_per_metre * phase_per_metre).exp()
            })
            .collect();

        let scan = PhaseScan::new(cav_phases, bpm_phases, amplitudes).unwrap();
        let result = reconstruct(&scan, &beamline, Q_E0TL).unwrap();

        assert_eq!(result.samples_used, 15);
        assert_relative_eq!(result.fit.amplitude, 25.0, max_relative = 1e-9);
        assert_relative_eq!(result.fit.phase_offset_deg, phi0_true, max_relative = 1e-9);
        assert_relative_eq!(result.correlations.z2, truth.z2, max_relative = 1e-6);
        assert_relative_eq!(result.correlations.z_de, truth.z_de, max_relative = 1e-6);
        assert_relative_eq!(result.correlations.de2, truth.de2, max_relative = 1e-6);
        assert_relative_eq!(
            result.twiss.emittance,
            truth.discriminant().sqrt(),
            max_relative = 1e-6
        );
        assert!(result.correlations.is_physical());
    }
}
