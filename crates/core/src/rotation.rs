//! Randomized Walsh-Hadamard rotation.
//!
//! Rotating before quantization spreads a vector's mass evenly over all
//! coordinates, which keeps per-coordinate rounding error and modular
//! wraparound small. The transform needs a power-of-two length, hence the
//! padding applied by the discrete query.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::tensor::Vector;

/// Rotation applied before quantization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
    /// No rotation.
    Identity,
    /// Random sign flips followed by a normalized Walsh-Hadamard transform.
    #[default]
    Hadamard,
}

/// A concrete randomized Hadamard rotation `x -> H D x / sqrt(d)`.
#[derive(Clone, Debug, PartialEq)]
pub struct RandomizedHadamard {
    signs: Vec<f64>,
}

impl RandomizedHadamard {
    /// Draw random signs for a `dim`-dimensional rotation.
    pub fn new<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Result<Self> {
        if !dim.is_power_of_two() {
            return Err(DpError::input(format!(
                "Hadamard rotation needs a power-of-two dimension, got {dim}"
            )));
        }
        let signs = (0..dim)
            .map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 })
            .collect();
        Ok(Self { signs })
    }

    /// Dimension of the rotation.
    pub fn dim(&self) -> usize {
        self.signs.len()
    }

    /// Apply the rotation in-place.
    pub fn rotate(&self, v: &mut Vector) -> Result<()> {
        self.check_len(v)?;
        for (x, s) in v.iter_mut().zip(&self.signs) {
            *x *= s;
        }
        normalized_fwht(v);
        Ok(())
    }

    /// Apply the inverse rotation in-place.
    pub fn inverse(&self, v: &mut Vector) -> Result<()> {
        self.check_len(v)?;
        normalized_fwht(v);
        for (x, s) in v.iter_mut().zip(&self.signs) {
            *x *= s;
        }
        Ok(())
    }

    fn check_len(&self, v: &Vector) -> Result<()> {
        if v.len() != self.dim() {
            return Err(DpError::input(format!(
                "rotation of dimension {} applied to vector of length {}",
                self.dim(),
                v.len()
            )));
        }
        Ok(())
    }
}

/// Walsh-Hadamard transform scaled by `1/sqrt(len)`; it is its own inverse.
fn normalized_fwht(v: &mut Vector) {
    let n = v.len();
    let norm = 1.0 / (n as f64).sqrt();
    match v.as_slice_mut() {
        Some(slice) => fwht(slice),
        None => {
            let mut buf = v.to_vec();
            fwht(&mut buf);
            v.iter_mut().zip(buf).for_each(|(x, y)| *x = y);
        }
    }
    v.mapv_inplace(|x| x * norm);
}

fn fwht(data: &mut [f64]) {
    let n = data.len();
    let mut h = 1;
    while h < n {
        for start in (0..n).step_by(2 * h) {
            for i in start..start + h {
                let a = data[i];
                let b = data[i + h];
                data[i] = a + b;
                data[i + h] = a - b;
            }
        }
        h *= 2;
    }
}
