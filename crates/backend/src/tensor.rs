use num_complex::Complex64;

use crate::error::{BackendError, BackendResult};

pub type C64 = Complex64;

/// Row-major dense complex tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseTensor {
    shape: Vec<usize>,
    data: Vec<C64>,
}

impl DenseTensor {
    pub fn new(shape: Vec<usize>, data: Vec<C64>) -> BackendResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(BackendError::Shape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![C64::new(0.0, 0.0); len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[C64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [C64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<C64> {
        self.data
    }

    pub fn strides(&self) -> Vec<usize> {
        strides_of(&self.shape)
    }

    pub fn reshape(self, shape: Vec<usize>) -> BackendResult<Self> {
        Self::new(shape, self.data)
    }

    /// Reorder axes so that output axis `i` is input axis `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> BackendResult<Self> {
        check_permutation(perm, self.rank())?;
        if perm.iter().enumerate().all(|(i, &p)| i == p) {
            return Ok(self.clone());
        }

        let old_strides = self.strides();
        let new_shape: Vec<usize> = perm.iter().map(|&p| self.shape[p]).collect();
        let mut out = Vec::with_capacity(self.data.len());
        let mut coords = vec![0usize; new_shape.len()];

        for _ in 0..self.data.len() {
            let offset: usize = coords
                .iter()
                .zip(perm)
                .map(|(&c, &p)| c * old_strides[p])
                .sum();
            out.push(self.data[offset]);

            for axis in (0..coords.len()).rev() {
                coords[axis] += 1;
                if coords[axis] < new_shape[axis] {
                    break;
                }
                coords[axis] = 0;
            }
        }

        Self::new(new_shape, out)
    }

    /// Permute `row_axes` to the front and flatten into a `rows x cols`
    /// matrix. Column axes keep ascending order.
    pub(crate) fn matricize(
        &self,
        row_axes: &[usize],
    ) -> BackendResult<(Self, Vec<usize>, Vec<usize>)> {
        check_distinct(row_axes, self.rank())?;
        let col_axes: Vec<usize> = (0..self.rank()).filter(|a| !row_axes.contains(a)).collect();
        let perm: Vec<usize> = row_axes.iter().chain(col_axes.iter()).copied().collect();
        let row_dims: Vec<usize> = row_axes.iter().map(|&a| self.shape[a]).collect();
        let col_dims: Vec<usize> = col_axes.iter().map(|&a| self.shape[a]).collect();
        let rows: usize = row_dims.iter().product();
        let cols: usize = col_dims.iter().product();
        let m = self.permute(&perm)?.reshape(vec![rows, cols])?;
        Ok((m, row_dims, col_dims))
    }
}

pub(crate) fn strides_of(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn check_permutation(perm: &[usize], rank: usize) -> BackendResult<()> {
    if perm.len() != rank {
        return Err(BackendError::InvalidAxes(format!(
            "permutation {:?} does not match rank {}",
            perm, rank
        )));
    }
    check_distinct(perm, rank)
}

pub(crate) fn check_distinct(axes: &[usize], rank: usize) -> BackendResult<()> {
    for (i, &a) in axes.iter().enumerate() {
        if a >= rank {
            return Err(BackendError::InvalidAxes(format!(
                "axis {} out of range for rank {}",
                a, rank
            )));
        }
        if axes[..i].contains(&a) {
            return Err(BackendError::InvalidAxes(format!("axis {} repeated", a)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64) -> C64 {
        C64::new(re, 0.0)
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(DenseTensor::new(vec![2, 3], vec![c(0.0); 5]).is_err());
    }

    #[test]
    fn permute_transposes_matrix() {
        let t = DenseTensor::new(vec![2, 3], (0..6).map(|x| c(x as f64)).collect()).unwrap();
        let p = t.permute(&[1, 0]).unwrap();
        assert_eq!(p.shape(), &[3, 2]);
        let expected: Vec<C64> = [0.0, 3.0, 1.0, 4.0, 2.0, 5.0].iter().map(|&x| c(x)).collect();
        assert_eq!(p.data(), expected.as_slice());
    }

    #[test]
    fn permute_rank3_roundtrip() {
        let t = DenseTensor::new(vec![2, 3, 4], (0..24).map(|x| c(x as f64)).collect()).unwrap();
        let p = t.permute(&[2, 0, 1]).unwrap();
        assert_eq!(p.shape(), &[4, 2, 3]);
        let back = p.permute(&[1, 2, 0]).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn repeated_axis_is_rejected() {
        let t = DenseTensor::zeros(vec![2, 2]);
        assert!(t.permute(&[0, 0]).is_err());
    }
}
