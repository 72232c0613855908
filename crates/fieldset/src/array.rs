//! Minimal dense n-dimensional array used for coordinates and field data.

use serde::{Deserialize, Serialize};

use crate::error::{FieldError, Result};

/// Row-major `f64` array with an explicit shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NdArray {
    /// Wrap `data` with `shape`, checking the element count.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FieldError::configuration(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn filled(shape: Vec<usize>, value: f64) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            data: vec![value; n],
        }
    }

    /// Build from a function of the multi-index.
    pub fn from_fn(shape: Vec<usize>, mut f: impl FnMut(&[usize]) -> f64) -> Self {
        let n: usize = shape.iter().product();
        let mut data = Vec::with_capacity(n);
        let mut idx = vec![0usize; shape.len()];
        for _ in 0..n {
            data.push(f(&idx));
            for axis in (0..shape.len()).rev() {
                idx[axis] += 1;
                if idx[axis] < shape[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Flat offset of a multi-index. Panics if `idx` has the wrong rank.
    pub fn offset(&self, idx: &[usize]) -> usize {
        debug_assert_eq!(idx.len(), self.shape.len());
        idx.iter()
            .zip(&self.shape)
            .fold(0, |acc, (&i, &n)| acc * n + i)
    }

    pub fn get(&self, idx: &[usize]) -> f64 {
        self.data[self.offset(idx)]
    }

    /// Same data with a new shape of equal size.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        Self::new(shape, self.data)
    }

    /// Reverse the order of all axes.
    pub fn transposed(&self) -> Self {
        let rev: Vec<usize> = self.shape.iter().rev().copied().collect();
        Self::from_fn(rev, |idx| {
            let orig: Vec<usize> = idx.iter().rev().copied().collect();
            self.get(&orig)
        })
    }

    /// Reverse the element order along `axis`.
    pub fn flipped(&self, axis: usize) -> Self {
        let n = self.shape[axis];
        Self::from_fn(self.shape.clone(), |idx| {
            let mut src = idx.to_vec();
            src[axis] = n - 1 - idx[axis];
            self.get(&src)
        })
    }

    /// Contiguous slice `[start, start + len)` along `axis`.
    pub fn slice_axis(&self, axis: usize, start: usize, len: usize) -> Self {
        let mut shape = self.shape.clone();
        shape[axis] = len;
        Self::from_fn(shape, |idx| {
            let mut src = idx.to_vec();
            src[axis] += start;
            self.get(&src)
        })
    }

    /// Concatenate arrays of equal rank along `axis`.
    pub fn concatenate(parts: &[&NdArray], axis: usize) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| FieldError::configuration("nothing to concatenate"))?;
        let mut shape = first.shape.clone();
        let mut starts = Vec::with_capacity(parts.len());
        let mut total = 0;
        for p in parts {
            let compatible = p.ndim() == first.ndim()
                && p.shape
                    .iter()
                    .zip(&first.shape)
                    .enumerate()
                    .all(|(a, (x, y))| a == axis || x == y);
            if !compatible {
                return Err(FieldError::configuration(format!(
                    "cannot concatenate shapes {:?} and {:?} along axis {axis}",
                    first.shape, p.shape
                )));
            }
            starts.push(total);
            total += p.shape[axis];
        }
        shape[axis] = total;
        Ok(Self::from_fn(shape, |idx| {
            let part = starts.iter().rposition(|&s| s <= idx[axis]).unwrap_or(0);
            let mut src = idx.to_vec();
            src[axis] -= starts[part];
            parts[part].get(&src)
        }))
    }

    /// True if the array has a single element along every axis except one.
    pub fn is_vector(&self) -> bool {
        self.shape.iter().filter(|&&n| n > 1).count() <= 1
    }
}
