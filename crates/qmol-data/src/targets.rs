//! QM9 regression targets, unit conversions, and label normalization.
//!
//! The raw table stores energies in Hartree; models are trained on eV
//! (and evaluated in meV), so each target carries a fixed conversion
//! factor applied once at load time. `TargetScaler` then standardizes
//! the converted labels with statistics fitted on the training split.

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// CODATA 2018 Hartree-to-electronvolt conversion.
pub const HARTREE_TO_EV: f64 = 27.211386245988;

/// The nineteen QM9 regression targets, in the column order of the
/// processed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetTask {
    /// Rotational constant A (GHz).
    A,
    /// Rotational constant B (GHz).
    B,
    /// Rotational constant C (GHz).
    C,
    /// Dipole moment (Debye).
    Mu,
    /// Isotropic polarizability (Bohr^3).
    Alpha,
    /// HOMO energy (eV after conversion).
    Homo,
    /// LUMO energy (eV after conversion).
    Lumo,
    /// HOMO-LUMO gap (eV after conversion).
    Gap,
    /// Electronic spatial extent (Bohr^2).
    R2,
    /// Zero point vibrational energy (eV after conversion).
    Zpve,
    /// Internal energy at 0 K (eV after conversion).
    U0,
    /// Internal energy at 298.15 K (eV after conversion).
    U298,
    /// Enthalpy at 298.15 K (eV after conversion).
    H298,
    /// Free energy at 298.15 K (eV after conversion).
    G298,
    /// Heat capacity at 298.15 K (cal/mol/K).
    Cv,
    /// Atomization energy at 0 K (eV after conversion).
    U0Atom,
    /// Atomization energy at 298.15 K (eV after conversion).
    U298Atom,
    /// Atomization enthalpy at 298.15 K (eV after conversion).
    H298Atom,
    /// Atomization free energy at 298.15 K (eV after conversion).
    G298Atom,
}

impl TargetTask {
    /// All targets in table column order.
    pub const ALL: [TargetTask; 19] = [
        TargetTask::A,
        TargetTask::B,
        TargetTask::C,
        TargetTask::Mu,
        TargetTask::Alpha,
        TargetTask::Homo,
        TargetTask::Lumo,
        TargetTask::Gap,
        TargetTask::R2,
        TargetTask::Zpve,
        TargetTask::U0,
        TargetTask::U298,
        TargetTask::H298,
        TargetTask::G298,
        TargetTask::Cv,
        TargetTask::U0Atom,
        TargetTask::U298Atom,
        TargetTask::H298Atom,
        TargetTask::G298Atom,
    ];

    /// Column index in the processed target table.
    pub fn column(self) -> usize {
        Self::ALL
            .iter()
            .position(|t| *t == self)
            .unwrap_or_default()
    }

    /// Factor multiplying the raw table value at load time.
    pub fn unit_conversion(self) -> f64 {
        match self {
            TargetTask::Homo
            | TargetTask::Lumo
            | TargetTask::Gap
            | TargetTask::Zpve
            | TargetTask::U0
            | TargetTask::U298
            | TargetTask::H298
            | TargetTask::G298
            | TargetTask::U0Atom
            | TargetTask::U298Atom
            | TargetTask::H298Atom
            | TargetTask::G298Atom => HARTREE_TO_EV,
            TargetTask::A
            | TargetTask::B
            | TargetTask::C
            | TargetTask::Mu
            | TargetTask::Alpha
            | TargetTask::R2
            | TargetTask::Cv => 1.0,
        }
    }

    /// Factor mapping the converted unit to the reporting unit (meV for
    /// energies, identity otherwise).
    pub fn ev_to_mev(self) -> f64 {
        if self.unit_conversion() == 1.0 {
            1.0
        } else {
            1000.0
        }
    }

    /// The twelve targets typically trained on, `mu` through `cv`.
    pub fn default_tasks() -> Vec<TargetTask> {
        TargetTask::ALL[3..=14].to_vec()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetTask::A => "A",
            TargetTask::B => "B",
            TargetTask::C => "C",
            TargetTask::Mu => "mu",
            TargetTask::Alpha => "alpha",
            TargetTask::Homo => "homo",
            TargetTask::Lumo => "lumo",
            TargetTask::Gap => "gap",
            TargetTask::R2 => "r2",
            TargetTask::Zpve => "zpve",
            TargetTask::U0 => "u0",
            TargetTask::U298 => "u298",
            TargetTask::H298 => "h298",
            TargetTask::G298 => "g298",
            TargetTask::Cv => "cv",
            TargetTask::U0Atom => "u0_atom",
            TargetTask::U298Atom => "u298_atom",
            TargetTask::H298Atom => "h298_atom",
            TargetTask::G298Atom => "g298_atom",
        }
    }
}

impl fmt::Display for TargetTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetTask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TargetTask::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTargetTask(s.to_string()))
    }
}

/// Per-task standardization statistics fitted on a training split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetScaler {
    pub tasks: Vec<TargetTask>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl TargetScaler {
    /// Fit mean and sample standard deviation per task over `labels`,
    /// a `[n_samples, n_tasks]` tensor of converted values.
    pub fn fit(tasks: Vec<TargetTask>, labels: &Tensor) -> Result<Self> {
        let rows = labels.to_dtype(DType::F64)?.to_vec2::<f64>()?;
        let n = rows.len();
        if n < 2 {
            return Err(Error::SampleShape("scaler fit needs at least two samples"));
        }
        let n_tasks = tasks.len();
        let mut mean = vec![0.0; n_tasks];
        for row in &rows {
            if row.len() != n_tasks {
                return Err(Error::SampleShape("label width does not match task list"));
            }
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f64;
        }
        let mut var = vec![0.0; n_tasks];
        for row in &rows {
            for (k, v) in row.iter().enumerate() {
                var[k] += (v - mean[k]).powi(2);
            }
        }
        let std = var.iter().map(|v| (v / (n - 1) as f64).sqrt()).collect();
        Ok(TargetScaler { tasks, mean, std })
    }

    fn stat_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let n = self.tasks.len();
        let mean: Vec<f32> = self.mean.iter().map(|&v| v as f32).collect();
        let std: Vec<f32> = self.std.iter().map(|&v| v as f32).collect();
        let mean = Tensor::from_vec(mean, (1, n), device)?;
        let std = Tensor::from_vec(std, (1, n), device)?;
        Ok((mean, std))
    }

    /// Standardize `[batch, n_tasks]` labels.
    pub fn normalize(&self, labels: &Tensor) -> Result<Tensor> {
        let (mean, std) = self.stat_tensors(labels.device())?;
        Ok(labels.broadcast_sub(&mean)?.broadcast_div(&std)?)
    }

    /// Invert [`normalize`](Self::normalize).
    pub fn denormalize(&self, labels: &Tensor) -> Result<Tensor> {
        let (mean, std) = self.stat_tensors(labels.device())?;
        Ok(labels.broadcast_mul(&std)?.broadcast_add(&mean)?)
    }

    /// Rescale denormalized predictions to reporting units (meV for
    /// energy-valued tasks, unchanged otherwise).
    pub fn to_millielectronvolt(&self, labels: &Tensor) -> Result<Tensor> {
        let factors: Vec<f32> = self.tasks.iter().map(|t| t.ev_to_mev() as f32).collect();
        let n = factors.len();
        let factors = Tensor::from_vec(factors, (1, n), labels.device())?;
        Ok(labels.broadcast_mul(&factors)?)
    }
}
