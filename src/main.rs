use ltwiss::*;
use std::f64::consts::TAU;
use std::time;

fn main() {
    let now = time::Instant::now();
    let beamline = Beamline {
        rf_frequency: 805.0e+6,  // Hz
        bpm_frequency: 402.5e+6, // Hz
        drift_length: 3.5,       // m
        mass: 0.939294,          // GeV
        e_kin_ini: 0.1856,       // GeV
    };
    let q_e0tl = 0.002; // GeV
    let stage = GapDrift {
        q_e0tl,
        rf_frequency: beamline.rf_frequency,
        drift_length: beamline.drift_length,
        mass: beamline.mass,
    };
    // second moments the synthetic scan is generated from
    let truth = CorrelationMatrix::new(1.0e-4, 1.5e-6, 1.0e-7);
    let rf_phase_offset = 210.0; // deg, control phase to RF phase
    let mut cav_phases = vec![];
    let mut bpm_phases = vec![];
    let mut amplitudes = vec![];
    for cav_phase in (0..72).map(|i| i as f64 * 5.0) {
        let rf_phase = cav_phase + rf_phase_offset;
        let e_kin = beamline.e_kin_ini + q_e0tl * rf_phase.to_radians().cos();
        let beta = beta_from_kinetic(e_kin, beamline.mass).expect("synthetic energy");
        let (m1, m2) = stage
            .matrix(beta, rf_phase)
            .expect("synthetic transport")
            .first_row();
        let ms = m1 * m1 * truth.z2 + 2.0 * m1 * m2 * truth.z_de + m2 * m2 * truth.de2;
        let k = TAU * beamline.bpm_frequency / (beta * SPEED_OF_LIGHT);
        cav_phases.push(cav_phase);
        bpm_phases.push(wrap_phase_deg(
            25.0 * (cav_phase + rf_phase_offset - 180.0).to_radians().cos() + 165.0,
        ));
        amplitudes.push((-0.5 * ms * k * k).exp());
    }
    let scan = PhaseScan::new(cav_phases, bpm_phases, amplitudes).expect("synthetic scan");

    println!("\nReconstructing synthetic phase scan");
    println!("npoints: {:10}", scan.len());
    println!("{:10.2e} sec for generating scan", 1e-6*(now.elapsed().as_micros() as f64));
    let now = time::Instant::now();
    let result = reconstruct(&scan, &beamline, q_e0tl).expect("reconstruction failed");
    println!("{:10.2e} sec for reconstructing", 1e-6*(now.elapsed().as_micros() as f64));

    println!("samples used: {:6}", result.samples_used);
    println!("fitted bpm phase modulation: {:8.3} deg", result.fit.amplitude);
    println!("rf phase offset:             {:8.3} deg", result.fit.rf_phase_offset_deg());
    println!("<z^2>   {:12.5e} m^2    (true {:12.5e})", result.correlations.z2, truth.z2);
    println!("<z.dE>  {:12.5e} m.GeV  (true {:12.5e})", result.correlations.z_de, truth.z_de);
    println!("<dE^2>  {:12.5e} GeV^2  (true {:12.5e})", result.correlations.de2, truth.de2);
    println!("alpha     {:10.4}", result.twiss.alpha);
    println!("beta      {:10.4} m/GeV", result.twiss.beta);
    println!("emittance {:10.4e} m.GeV", result.twiss.emittance);
}
