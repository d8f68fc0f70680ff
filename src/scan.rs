use crate::error::{Error, Result};
use crate::utils::SPEED_OF_LIGHT;
use std::f64::consts::TAU;

/// One phase-scan measurement, after calibration: the cavity control
/// phase it was taken at, the (possibly angle-wrapped) BPM phase and
/// normalized BPM amplitude that were read back, and the kinetic energy
/// of the bunch downstream of the gap at this setting.
///
/// Samples are immutable once recorded; the reconstruction consumes them
/// read-only.
#[derive(Debug,Clone,Copy,PartialEq)]
pub struct ScanSample {
    /// cavity control phase in degrees
    pub cav_phase_deg: f64,
    /// measured BPM phase in degrees, wrapped into (-180, 180]
    pub bpm_phase_deg: f64,
    /// measured BPM amplitude normalized to the reference maximum
    pub bpm_amplitude: f64,
    /// kinetic energy at this scan point in GeV
    pub e_kin: f64,
}

/// Raw phase-scan campaign: parallel arrays of cavity phase, BPM phase
/// and BPM amplitude, one entry per scan point, exactly as delivered by
/// the acquisition layer.
#[derive(Debug,Clone)]
pub struct PhaseScan {
    cav_phase_deg: Vec<f64>,
    bpm_phase_deg: Vec<f64>,
    bpm_amplitude: Vec<f64>,
}

impl PhaseScan {
    /// Bundle the three scan arrays. They must be of equal, non-zero
    /// length.
    pub fn new(
        cav_phase_deg: Vec<f64>,
        bpm_phase_deg: Vec<f64>,
        bpm_amplitude: Vec<f64>,
    ) -> Result<Self> {
        let n = cav_phase_deg.len();
        if n == 0 {
            return Err(Error::invalid("phase scan is empty"));
        }
        if bpm_phase_deg.len() != n || bpm_amplitude.len() != n {
            return Err(Error::invalid(format!(
                "scan arrays have mismatched lengths {n}/{}/{}",
                bpm_phase_deg.len(),
                bpm_amplitude.len()
            )));
        }
        Ok(Self {
            cav_phase_deg,
            bpm_phase_deg,
            bpm_amplitude,
        })
    }

    pub fn len(&self) -> usize {
        self.cav_phase_deg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cav_phase_deg.is_empty()
    }

    pub fn cav_phase_deg(&self) -> &[f64] {
        &self.cav_phase_deg
    }

    pub fn bpm_phase_deg(&self) -> &[f64] {
        &self.bpm_phase_deg
    }

    pub fn bpm_amplitude(&self) -> &[f64] {
        &self.bpm_amplitude
    }

    /// (cavity phase, BPM phase) pairs for the harmonic fit.
    pub fn phase_points(&self) -> Vec<(f64, f64)> {
        self.cav_phase_deg
            .iter()
            .zip(self.bpm_phase_deg.iter())
            .map(|(&c, &b)| (c, b))
            .collect()
    }

    /// Attach per-point kinetic energies, turning the raw arrays into
    /// [ScanSample] records.
    pub fn samples(&self, e_kin: &[f64]) -> Result<Vec<ScanSample>> {
        if e_kin.len() != self.len() {
            return Err(Error::invalid(format!(
                "{} energies supplied for {} scan points",
                e_kin.len(),
                self.len()
            )));
        }
        Ok(self
            .cav_phase_deg
            .iter()
            .zip(self.bpm_phase_deg.iter())
            .zip(self.bpm_amplitude.iter())
            .zip(e_kin.iter())
            .map(|(((&cav, &bpm), &amp), &e)| ScanSample {
                cav_phase_deg: cav,
                bpm_phase_deg: bpm,
                bpm_amplitude: amp,
                e_kin: e,
            })
            .collect())
    }
}

/// Mean-square longitudinal size implied by one BPM amplitude reading.
#[derive(Debug,Clone,Copy,PartialEq)]
pub enum SizeEstimate {
    /// bunch length resolved: mean-square size at the BPM in m^2
    Resolved(f64),
    /// amplitude at (or above) the reference maximum: the suppression is
    /// below the measurement resolution, and the sample carries no size
    /// information. Callers must treat this as missing data, never as a
    /// measured size of zero.
    BelowResolution,
}

impl SizeEstimate {
    /// The measured size, if the sample resolved one.
    pub fn resolved(&self) -> Option<f64> {
        match self {
            Self::Resolved(ms) => Some(*ms),
            Self::BelowResolution => None,
        }
    }
}

/// Gaussian-beam response model of a BPM pickup, converting a normalized
/// signal amplitude into a mean-square longitudinal bunch size.
///
/// Bunch length suppresses the signal of a pickup running at frequency
/// `f` as `a = exp(-sigma_phase^2/2)`, so the RMS phase spread follows
/// from the amplitude as `sigma_phase^2 = -2*ln(a)`, and converts to a
/// spatial spread through the phase advance per metre `2*pi*f/(beta*c)`.
#[derive(Debug,Clone)]
pub struct BpmSizeModel {
    /// BPM electronics frequency in Hz
    pub frequency: f64,
}

impl BpmSizeModel {
    pub fn new(frequency: f64) -> Result<Self> {
        if !(frequency > 0.0) {
            return Err(Error::invalid(format!(
                "bpm frequency {frequency} must be positive"
            )));
        }
        Ok(Self { frequency })
    }

    /// Mean-square longitudinal size at the BPM for one amplitude
    /// reading, given the relativistic beta of the beam at the BPM.
    ///
    /// Amplitudes at or above 1 yield [SizeEstimate::BelowResolution];
    /// amplitudes at or below 0 are a hard precondition violation (the
    /// logarithm is undefined there).
    pub fn mean_square_size(&self, amplitude: f64, beta: f64) -> Result<SizeEstimate> {
        if !(amplitude > 0.0) || !amplitude.is_finite() {
            return Err(Error::invalid(format!(
                "bpm amplitude {amplitude} must be positive"
            )));
        }
        if !(beta > 0.0 && beta < 1.0) {
            return Err(Error::invalid(format!(
                "relativistic beta {beta} outside (0,1)"
            )));
        }
        if amplitude >= 1.0 {
            return Ok(SizeEstimate::BelowResolution);
        }
        // bpm phase spread in radians
        let ms_phase = -2.0 * amplitude.ln();
        let phase_per_metre = TAU * self.frequency / (beta * SPEED_OF_LIGHT);
        Ok(SizeEstimate::Resolved(ms_phase / (phase_per_metre * phase_per_metre)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn saturated_amplitude_is_sentinel() {
        let model = BpmSizeModel::new(402.5e+6).unwrap();
        assert_eq!(
            model.mean_square_size(1.0, 0.55).unwrap(),
            SizeEstimate::BelowResolution
        );
        assert_eq!(
            model.mean_square_size(1.2, 0.55).unwrap(),
            SizeEstimate::BelowResolution
        );
        assert_eq!(model.mean_square_size(1.0, 0.55).unwrap().resolved(), None);
    }

    #[test]
    fn nonpositive_amplitude_is_an_error() {
        let model = BpmSizeModel::new(402.5e+6).unwrap();
        assert!(model.mean_square_size(0.0, 0.55).is_err());
        assert!(model.mean_square_size(-0.5, 0.55).is_err());
        assert!(model.mean_square_size(f64::NAN, 0.55).is_err());
    }

    #[test]
    fn size_round_trips_through_amplitude() {
        let model = BpmSizeModel::new(402.5e+6).unwrap();
        let beta = 0.55;
        let ms_true = 1.0e-4; // (1 cm)^2
        let phase_per_metre = TAU * model.frequency / (beta * SPEED_OF_LIGHT);
        let amp = (-0.5 * ms_true * phase_per_metre * phase_per_metre).exp();
        let est = model.mean_square_size(amp, beta).unwrap();
        assert_abs_diff_eq!(est.resolved().unwrap(), ms_true, epsilon = 1e-16);
    }

    #[test]
    fn shorter_bunch_gives_higher_amplitude() {
        let model = BpmSizeModel::new(402.5e+6).unwrap();
        let a = model.mean_square_size(0.99, 0.55).unwrap().resolved().unwrap();
        let b = model.mean_square_size(0.90, 0.55).unwrap().resolved().unwrap();
        assert!(a < b);
    }

    #[test]
    fn scan_container_checks_lengths() {
        assert!(PhaseScan::new(vec![0.0], vec![0.0], vec![]).is_err());
        assert!(PhaseScan::new(vec![], vec![], vec![]).is_err());
        let scan = PhaseScan::new(
            vec![-10.0, 0.0, 10.0],
            vec![1.0, 2.0, 3.0],
            vec![0.9, 0.8, 0.9],
        )
        .unwrap();
        assert_eq!(scan.len(), 3);
        assert_eq!(scan.phase_points()[1], (0.0, 2.0));
        assert!(scan.samples(&[0.1, 0.2]).is_err());
        let samples = scan.samples(&[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(samples[2].e_kin, 0.3);
        assert_eq!(samples[0].bpm_amplitude, 0.9);
    }
}
