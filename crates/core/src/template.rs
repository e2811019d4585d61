//! Client update templates and dimension arithmetic.
//!
//! A template is the ordered list of tensor shapes a client sends each round.
//! The aggregation pipeline works on the flattened concatenation of those
//! tensors; the discrete query additionally pads it to a power of two.

use ndarray::{Array1, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::tensor::{Tensor, Vector};

/// Ordered tensor shapes describing one client's update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTemplate {
    shapes: Vec<Vec<usize>>,
}

impl ClientTemplate {
    /// Create a template, rejecting empty templates and zero-length axes.
    ///
    /// A rank-zero shape (`[]`) describes a scalar and counts one element.
    pub fn new(shapes: Vec<Vec<usize>>) -> Result<Self> {
        if shapes.is_empty() {
            return Err(DpError::template("template must contain at least one tensor"));
        }
        for (i, shape) in shapes.iter().enumerate() {
            if shape.iter().any(|&d| d == 0) {
                return Err(DpError::template(format!(
                    "tensor {i} has a non-positive axis: {shape:?}"
                )));
            }
        }
        Ok(Self { shapes })
    }

    /// Template with a single flat tensor of length `dim`.
    pub fn flat(dim: usize) -> Result<Self> {
        Self::new(vec![vec![dim]])
    }

    /// Template matching the shapes of an existing update.
    pub fn from_tensors(tensors: &[Tensor]) -> Result<Self> {
        Self::new(tensors.iter().map(|t| t.shape().to_vec()).collect())
    }

    /// Tensor shapes in order.
    pub fn shapes(&self) -> &[Vec<usize>] {
        &self.shapes
    }

    /// Sum of element counts across all tensors.
    pub fn total_dim(&self) -> usize {
        self.shapes
            .iter()
            .map(|shape| shape.iter().product::<usize>())
            .sum()
    }

    /// Concatenate a client update into a single vector in template order.
    pub fn flatten(&self, tensors: &[Tensor]) -> Result<Vector> {
        if tensors.len() != self.shapes.len() {
            return Err(DpError::input(format!(
                "expected {} tensors, got {}",
                self.shapes.len(),
                tensors.len()
            )));
        }
        let mut flat = Vec::with_capacity(self.total_dim());
        for (i, (tensor, shape)) in tensors.iter().zip(&self.shapes).enumerate() {
            if tensor.shape() != shape.as_slice() {
                return Err(DpError::input(format!(
                    "tensor {i} has shape {:?}, template expects {shape:?}",
                    tensor.shape()
                )));
            }
            flat.extend(tensor.iter().copied());
        }
        Ok(Array1::from_vec(flat))
    }

    /// Split a flat vector back into template-shaped tensors.
    pub fn unflatten(&self, flat: &Vector) -> Result<Vec<Tensor>> {
        if flat.len() != self.total_dim() {
            return Err(DpError::input(format!(
                "flat vector has {} elements, template expects {}",
                flat.len(),
                self.total_dim()
            )));
        }
        let mut out = Vec::with_capacity(self.shapes.len());
        let mut offset = 0;
        for shape in &self.shapes {
            let len: usize = shape.iter().product();
            let chunk = flat
                .slice_axis(Axis(0), Slice::from(offset..offset + len))
                .to_vec();
            let tensor = Tensor::from_shape_vec(IxDyn(shape), chunk)
                .map_err(|e| DpError::input(format!("cannot reshape to {shape:?}: {e}")))?;
            out.push(tensor);
            offset += len;
        }
        Ok(out)
    }
}

/// Smallest power of two that is `>= dim`.
///
/// Callers must pass `dim >= 1`.
pub fn pad_dim(dim: usize) -> usize {
    debug_assert!(dim >= 1, "pad_dim requires a positive dimension");
    dim.next_power_of_two()
}
