use fitrs::{Fits, Hdu};
use ltwiss::*;
use std::f64::consts::TAU;

fn main() {
    const NPOINTS: usize = 36; // one scan point per 10 deg of cavity phase
    let beamline = Beamline {
        rf_frequency: 805.0e+6,  // Hz
        bpm_frequency: 402.5e+6, // Hz
        drift_length: 3.5,       // m
        mass: 0.939294,          // GeV, proton-like beam
        e_kin_ini: 0.1856,       // GeV
    };
    let q_e0tl = 0.002; // GeV
    let stage = GapDrift {
        q_e0tl,
        rf_frequency: beamline.rf_frequency,
        drift_length: beamline.drift_length,
        mass: beamline.mass,
    };
    // second moments the campaign is generated from
    let truth = CorrelationMatrix::new(1.0e-4, 1.5e-6, 1.0e-7);
    let rf_phase_offset = 210.0; // deg

    let mut cav_phases = vec![];
    let mut bpm_phases = vec![];
    let mut amplitudes = vec![];
    for cav_phase in (0..NPOINTS).map(|i| i as f64 * 360.0 / NPOINTS as f64) {
        let rf_phase = cav_phase + rf_phase_offset;
        // energy downstream of the gap at this setting
        let e_kin = beamline.e_kin_ini + q_e0tl * rf_phase.to_radians().cos();
        let beta = beta_from_kinetic(e_kin, beamline.mass).expect("synthetic energy");
        // propagate the true moments to the BPM
        let (m1, m2) = stage
            .matrix(beta, rf_phase)
            .expect("synthetic transport")
            .first_row();
        let ms = m1 * m1 * truth.z2 + 2.0 * m1 * m2 * truth.z_de + m2 * m2 * truth.de2;
        // the BPM reads the size back as an amplitude suppression
        let k = TAU * beamline.bpm_frequency / (beta * SPEED_OF_LIGHT);
        cav_phases.push(cav_phase);
        bpm_phases.push(25.0 * (cav_phase + rf_phase_offset - 180.0).to_radians().cos() + 10.0);
        amplitudes.push((-0.5 * ms * k * k).exp());
    }
    // two saturated readings, as a real acquisition would deliver
    amplitudes[4] = 1.0;
    amplitudes[22] = 1.0;

    let scan = PhaseScan::new(cav_phases, bpm_phases, amplitudes).expect("synthetic scan");
    let result = reconstruct(&scan, &beamline, q_e0tl).expect("reconstruction failed");

    println!("scan points: {:6}", scan.len());
    println!("samples used:{:6}", result.samples_used);
    println!("alpha     {:10.4}", result.twiss.alpha);
    println!("beta      {:10.4} m/GeV", result.twiss.beta);
    println!("emittance {:10.4e} m.GeV (true {:10.4e})",
        result.twiss.emittance, truth.discriminant().sqrt());

    // dump the system and the fit diagnostics for offline inspection
    let samples: Vec<ScanSample> = scan.samples(
        &kinetic_energies(beamline.e_kin_ini, q_e0tl,
            &result.fit.rf_phases_deg(scan.cav_phase_deg())),
    ).expect("samples");
    let system = LsqSystem::new(
        &stage,
        result.fit.rf_phase_offset_deg(),
        &samples,
        &result.sizes,
    ).expect("system");
    save_mat("/tmp/lsq_system.fits", system);
    save_vec("/tmp/bpm_phase_fit.fits", result.fit.fitted.clone());
    save_vec("/tmp/bpm_phase_err.fits", result.fit.residuals.clone());
}

fn save_mat(filename: &str, matrix: (impl Matrix + std::marker::Sync)) {
    println!("doing {}", filename);
    let shape = [matrix.ncols(), matrix.nrows()];
    let data: Vec<f64> = matrix.flattened_array();
    let primary_hdu = Hdu::new(&shape, data);
    Fits::create(filename, primary_hdu).expect("Failed to create");
}

fn save_vec(filename: &str, data: Vec<f64>) {
    println!("doing {}", filename);
    let shape = [data.len()];
    let primary_hdu = Hdu::new(&shape, data);
    Fits::create(filename, primary_hdu).expect("Failed to create");
}
