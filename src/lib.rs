//! Longitudinal Twiss reconstruction tools for linac phase scans.
//!
//! A charged-particle bunch's longitudinal size cannot be measured
//! directly with non-invasive diagnostics, but it leaves a fingerprint:
//! the amplitude of a downstream beam-position-monitor (BPM) signal
//! degrades as the bunch gets longer. Scanning the phase of the upstream
//! RF cavity changes how the bunch is rotated in `(z, dE)` phase space
//! before it reaches the BPM, and each scan point therefore measures the
//! bunch ellipse along a different direction. This crate inverts that
//! ensemble of measurements through a "thin RF gap + drift" linear
//! transport model to recover the second moments — and from them the
//! Twiss parameters — of the bunch at the cavity entrance.
//!
//! The pipeline is a chain of pure components, each usable on its own:
//! a harmonic fit of the BPM phases calibrating the control-to-RF phase
//! offset ([CosineFit]), a Gaussian-response conversion of BPM
//! amplitudes into mean-square sizes ([BpmSizeModel]), a least-squares
//! system built from per-sample transport matrices ([LsqSystem]), and
//! the solve producing [CorrelationMatrix] and [Twiss]. The
//! [reconstruct()] front door runs them all in order.
//!
//! Nothing here talks to hardware, reads files, or keeps state between
//! calls: the crate consumes fully materialized scan arrays and scalar
//! constants, and returns values or typed failures. Independent scans
//! can be reconstructed in parallel freely.
//!
//! # Examples
//! Reconstruct a synthetic scan generated from known second moments:
//! ```
//! use ltwiss::*;
//! use std::f64::consts::TAU;
//!
//! let beamline = Beamline {
//!     rf_frequency: 805.0e+6,  // Hz
//!     bpm_frequency: 402.5e+6, // Hz
//!     drift_length: 3.5,       // m
//!     mass: 0.939294,          // GeV
//!     e_kin_ini: 0.1856,       // GeV
//! };
//! let q_e0tl = 0.002; // GeV
//! let stage = GapDrift {
//!     q_e0tl,
//!     rf_frequency: beamline.rf_frequency,
//!     drift_length: beamline.drift_length,
//!     mass: beamline.mass,
//! };
//! // true second moments at the cavity entrance
//! let truth = CorrelationMatrix::new(1.0e-4, 1.5e-6, 1.0e-7);
//! let (mut cav, mut bpm, mut amp) = (vec![], vec![], vec![]);
//! for i in 0..15 {
//!     let cav_phase = i as f64 * 24.0;
//!     // the hardware offset between control and RF phase is 210 deg
//!     let rf_phase = cav_phase + 210.0;
//!     let e_kin = beamline.e_kin_ini + q_e0tl * rf_phase.to_radians().cos();
//!     let beta = beta_from_kinetic(e_kin, beamline.mass).unwrap();
//!     let (m1, m2) = stage.matrix(beta, rf_phase).unwrap().first_row();
//!     let ms = m1*m1*truth.z2 + 2.0*m1*m2*truth.z_de + m2*m2*truth.de2;
//!     let k = TAU * beamline.bpm_frequency / (beta * SPEED_OF_LIGHT);
//!     cav.push(cav_phase);
//!     bpm.push(25.0 * (cav_phase + 30.0).to_radians().cos() + 10.0);
//!     amp.push((-0.5 * ms * k * k).exp());
//! }
//! let scan = PhaseScan::new(cav, bpm, amp).unwrap();
//! let result = reconstruct(&scan, &beamline, q_e0tl).unwrap();
//! let emittance_true = truth.discriminant().sqrt();
//! assert!((result.twiss.emittance - emittance_true).abs() < 1e-6 * emittance_true);
//! ```
//!
//! # Notes on units
//! Positions are in metres, energies in GeV, frequencies in Hz and
//! phases in degrees, matching the usual linac control-room conventions.
//! Beyond that the crate does not press an interpretation on the user:
//! any consistent set of units flows through the linear algebra
//! unchanged, and the outputs come back in the products of whatever was
//! put in.

#[macro_use] extern crate impl_ops;

pub mod error;
pub mod fitting;
pub mod linalg;
pub mod reconstruct;
pub mod scan;
pub mod transport;
pub mod utils;

pub use error::{Error, Result};
pub use fitting::{q_e0tl_from_phase_modulation, CosineFit};
pub use linalg::{lstsq_3, Mat2, Matrix};
pub use reconstruct::{
    reconstruct, Beamline, CorrelationMatrix, LsqSystem, Reconstruction, Twiss,
};
pub use scan::{BpmSizeModel, PhaseScan, ScanSample, SizeEstimate};
pub use transport::{drift_matrix, rf_gap_matrix, transport_matrix, GapDrift, PhaseVec2};
pub use utils::{
    beta_from_kinetic, gamma_from_kinetic, kinetic_energies, phase_near_target_deg,
    wrap_phase_deg, SPEED_OF_LIGHT,
};
