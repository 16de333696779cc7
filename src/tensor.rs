use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};
use thiserror::Error;

/// Errors raised by tensor construction and tensor math.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// Two tensors were expected to share a shape.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Shape the operation required.
        expected: Vec<usize>,
        /// Shape it received.
        got: Vec<usize>,
    },
    /// A blob does not fill the requested shape.
    #[error("shape {shape:?} holds {expected} values but blob has {got}")]
    InvalidShape {
        /// Requested shape.
        shape: Vec<usize>,
        /// Elements implied by the shape.
        expected: usize,
        /// Elements actually provided.
        got: usize,
    },
    /// Wrong number of dimensions for the operation.
    #[error("expected a {expected}-dimensional tensor, got shape {got:?}")]
    UnexpectedDims {
        /// Required rank.
        expected: usize,
        /// Shape received.
        got: Vec<usize>,
    },
    /// An index (token id, row, ...) is outside of its bound.
    #[error("index {index} out of bounds (size {bound})")]
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Exclusive upper bound.
        bound: usize,
    },
    /// A function received the wrong number of inputs.
    #[error("{func_name} expects {expected} inputs, got {got}")]
    UnexpectedInputCount {
        /// Required number of inputs.
        expected: usize,
        /// Number received.
        got: usize,
        /// Function reporting the problem.
        func_name: String,
    },
}

/// Dense row-major tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<V> {
    shape: Vec<usize>,
    blob: Vec<V>,
}

impl<V: Clone> Tensor<V> {
    /// Builds a tensor from a shape and a row-major blob.
    pub fn raw(shape: &[usize], blob: Vec<V>) -> Result<Self, TensorError> {
        let expected: usize = shape.iter().product();
        if expected != blob.len() {
            return Err(TensorError::InvalidShape {
                shape: shape.to_vec(),
                expected,
                got: blob.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            blob,
        })
    }

    /// Tensor filled with `value`.
    pub fn constant(shape: &[usize], value: V) -> Self {
        Self {
            shape: shape.to_vec(),
            blob: vec![value; shape.iter().product()],
        }
    }

    /// Dimensions, outermost first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values in row-major order.
    pub fn blob(&self) -> &[V] {
        &self.blob
    }

    /// Mutable values in row-major order.
    pub fn blob_mut(&mut self) -> &mut [V] {
        &mut self.blob
    }

    /// Consumes the tensor and returns its values.
    pub fn into_blob(self) -> Vec<V> {
        self.blob
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.blob.len()
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.shape.len()
    }

    /// Same data under a new shape with the same element count.
    pub fn reshape(self, shape: &[usize]) -> Result<Self, TensorError> {
        Self::raw(shape, self.blob)
    }

    /// Row `i` of a 2D tensor.
    pub fn row(&self, i: usize) -> Result<&[V], TensorError> {
        let (rows, cols) = self.dims2()?;
        if i >= rows {
            return Err(TensorError::IndexOutOfBounds {
                index: i,
                bound: rows,
            });
        }
        Ok(&self.blob[i * cols..(i + 1) * cols])
    }

    /// `(rows, cols)` of a 2D tensor.
    pub fn dims2(&self) -> Result<(usize, usize), TensorError> {
        match self.shape.as_slice() {
            [r, c] => Ok((*r, *c)),
            _ => Err(TensorError::UnexpectedDims {
                expected: 2,
                got: self.shape.clone(),
            }),
        }
    }

    /// `(d0, d1, d2)` of a 3D tensor.
    pub fn dims3(&self) -> Result<(usize, usize, usize), TensorError> {
        match self.shape.as_slice() {
            [a, b, c] => Ok((*a, *b, *c)),
            _ => Err(TensorError::UnexpectedDims {
                expected: 3,
                got: self.shape.clone(),
            }),
        }
    }

    /// Applies `f` to every element.
    pub fn map_values<W, F: FnMut(&V) -> W>(&self, f: F) -> Tensor<W> {
        Tensor {
            shape: self.shape.clone(),
            blob: self.blob.iter().map(f).collect(),
        }
    }
}

impl<V: Clone + Default> Tensor<V> {
    /// Tensor of default values.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::constant(shape, V::default())
    }
}

impl Tensor<f32> {
    /// Uniform init in `[-bound, bound)`.
    pub fn uniform<R: Rng>(rng: &mut R, shape: &[usize], bound: f32) -> Self {
        let dist = Uniform::new(-bound, bound);
        let size = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            blob: (0..size).map(|_| dist.sample(rng)).collect(),
        }
    }

    /// Normal init with mean 0.
    pub fn normal<R: Rng>(rng: &mut R, shape: &[usize], std: f32) -> Self {
        let size = shape.iter().product();
        let blob = match Normal::new(0.0, std) {
            Ok(dist) => (0..size).map(|_| dist.sample(rng)).collect(),
            // Only reachable with a non-finite std.
            Err(_) => vec![0.0; size],
        };
        Self {
            shape: shape.to_vec(),
            blob,
        }
    }

    fn expect_same_shape(&self, other: &Self) -> Result<(), TensorError> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    /// `[m, k] x [k, n] -> [m, n]`
    pub fn matmul(&self, other: &Self) -> Result<Self, TensorError> {
        let (m, k) = self.dims2()?;
        let (k2, n) = other.dims2()?;
        if k != k2 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![k, n],
                got: other.shape.clone(),
            });
        }
        let mut out = vec![0.0f32; m * n];
        if n > 0 {
            out.par_chunks_mut(n).enumerate().for_each(|(i, out_row)| {
                let lhs_row = &self.blob[i * k..(i + 1) * k];
                for (p, &a) in lhs_row.iter().enumerate() {
                    if a == 0.0 {
                        continue;
                    }
                    let rhs_row = &other.blob[p * n..(p + 1) * n];
                    for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                        *o += a * b;
                    }
                }
            });
        }
        Self::raw(&[m, n], out)
    }

    /// Transpose of a 2D tensor.
    pub fn transpose(&self) -> Result<Self, TensorError> {
        let (rows, cols) = self.dims2()?;
        let mut out = vec![0.0f32; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[c * rows + r] = self.blob[r * cols + c];
            }
        }
        Self::raw(&[cols, rows], out)
    }

    /// `self += other`.
    pub fn add_assign(&mut self, other: &Self) -> Result<(), TensorError> {
        self.expect_same_shape(other)?;
        for (a, b) in self.blob.iter_mut().zip(&other.blob) {
            *a += b;
        }
        Ok(())
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.blob {
            *v *= factor;
        }
    }

    /// Sum of squared elements.
    pub fn sum_squares(&self) -> f32 {
        self.blob.iter().map(|v| v * v).sum()
    }

    /// Index and value of the largest entry of each row of a 2D tensor.
    /// Ties resolve to the lowest index.
    pub fn argmax_rows(&self) -> Result<Vec<(usize, f32)>, TensorError> {
        let (rows, _) = self.dims2()?;
        (0..rows)
            .map(|r| {
                let row = self.row(r)?;
                let mut best = (0, f32::NEG_INFINITY);
                for (i, &v) in row.iter().enumerate() {
                    if v > best.1 {
                        best = (i, v);
                    }
                }
                Ok(best)
            })
            .collect()
    }

    fn zip_with<F: Fn(f32, f32) -> f32>(&self, other: &Self, f: F) -> Result<Self, TensorError> {
        self.expect_same_shape(other)?;
        Ok(Self {
            shape: self.shape.clone(),
            blob: self
                .blob
                .iter()
                .zip(&other.blob)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        })
    }
}

impl Add for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn add(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a + b)
    }
}

impl Sub for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a - b)
    }
}

impl Mul for &Tensor<f32> {
    type Output = Result<Tensor<f32>, TensorError>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.zip_with(rhs, |a, b| a * b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_rejects_wrong_blob_size() {
        let err = Tensor::raw(&[2, 3], vec![0.0f32; 5]).unwrap_err();
        assert!(matches!(err, TensorError::InvalidShape { expected: 6, got: 5, .. }));
    }

    #[test]
    fn matmul_small() {
        let a = Tensor::raw(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::raw(&[3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.blob(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_checks_inner_dim() {
        let a = Tensor::<f32>::zeros(&[2, 3]);
        let b = Tensor::<f32>::zeros(&[2, 2]);
        assert!(a.matmul(&b).is_err());
    }

    #[test]
    fn transpose_swaps_axes() {
        let a = Tensor::raw(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = a.transpose().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.blob(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        let a = Tensor::raw(&[2, 3], vec![0.2, 0.2, 0.2, 0.1, 0.7, 0.2]).unwrap();
        assert_eq!(a.argmax_rows().unwrap(), vec![(0, 0.2), (1, 0.7)]);
    }

    #[test]
    fn elementwise_ops_check_shape() {
        let a = Tensor::<f32>::constant(&[2], 3.0);
        let b = Tensor::<f32>::constant(&[2], 2.0);
        assert_eq!((&a - &b).unwrap().blob(), &[1.0, 1.0]);
        assert_eq!((&a * &b).unwrap().blob(), &[6.0, 6.0]);
        assert!((&a + &Tensor::<f32>::zeros(&[3])).is_err());
    }
}
