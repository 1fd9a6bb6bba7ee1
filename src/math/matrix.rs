use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// Dense row-major 2-D grid of `f64`.
///
/// Used for every per-pixel quantity the orchestrator moves around: image
/// channels, disparity and depth maps, explainability masks and their
/// gradients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix::filled(rows, cols, 0.0)
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Builds a matrix from nested rows. All rows must have the same length.
    pub fn from_data(data: Vec<Vec<f64>>) -> Matrix {
        let rows = data.len();
        let cols = data.first().map(|r| r.len()).unwrap_or(0);
        assert!(
            data.iter().all(|r| r.len() == cols),
            "Matrix rows are of incorrect sizes"
        );
        Matrix {
            rows,
            cols,
            data: data.into_iter().flatten().collect(),
        }
    }

    /// Wraps a flat row-major buffer; `None` if the length does not match.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Option<Matrix> {
        (data.len() == rows * cols).then_some(Matrix { rows, cols, data })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Element-wise combination of two same-shape matrices.
    pub fn zip_map<F>(&self, other: &Matrix, functor: F) -> Matrix
    where
        F: Fn(f64, f64) -> f64,
    {
        assert!(self.same_shape(other), "Matrices are of incorrect sizes");
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| functor(a, b))
                .collect(),
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Mean of all elements; 0 for an empty matrix.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min(&self) -> f64 {
        self.data.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Adaptive average pooling to `rows × cols`: every output cell averages
    /// the input window `[floor(i·R/r), ceil((i+1)·R/r))` on each axis.
    pub fn adaptive_avg_pool(&self, rows: usize, cols: usize) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for i in 0..rows {
            let r0 = i * self.rows / rows;
            let r1 = ((i + 1) * self.rows).div_ceil(rows);
            for j in 0..cols {
                let c0 = j * self.cols / cols;
                let c1 = ((j + 1) * self.cols).div_ceil(cols);
                let mut sum = 0.0;
                for r in r0..r1 {
                    for c in c0..c1 {
                        sum += self.get(r, c);
                    }
                }
                let n = ((r1 - r0) * (c1 - c0)).max(1);
                res.set(i, j, sum / n as f64);
            }
        }
        res
    }

    /// Bilinear resampling to `rows × cols` with aligned pixel centres.
    pub fn resize_bilinear(&self, rows: usize, cols: usize) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        if self.is_empty() {
            return res;
        }
        let sy = self.rows as f64 / rows as f64;
        let sx = self.cols as f64 / cols as f64;
        for i in 0..rows {
            let y = ((i as f64 + 0.5) * sy - 0.5).clamp(0.0, (self.rows - 1) as f64);
            let y0 = y.floor() as usize;
            let y1 = (y0 + 1).min(self.rows - 1);
            let fy = y - y0 as f64;
            for j in 0..cols {
                let x = ((j as f64 + 0.5) * sx - 0.5).clamp(0.0, (self.cols - 1) as f64);
                let x0 = x.floor() as usize;
                let x1 = (x0 + 1).min(self.cols - 1);
                let fx = x - x0 as f64;
                let top = self.get(y0, x0) * (1.0 - fx) + self.get(y0, x1) * fx;
                let bottom = self.get(y1, x0) * (1.0 - fx) + self.get(y1, x1) * fx;
                res.set(i, j, top * (1.0 - fy) + bottom * fy);
            }
        }
        res
    }

    /// Copies the `rows × cols` window whose top-left corner is `(row, col)`.
    pub fn crop(&self, row: usize, col: usize, rows: usize, cols: usize) -> Matrix {
        assert!(
            row + rows <= self.rows && col + cols <= self.cols,
            "Crop window out of bounds"
        );
        let mut res = Matrix::zeros(rows, cols);
        for i in 0..rows {
            let src = (row + i) * self.cols + col;
            res.data[i * cols..(i + 1) * cols].copy_from_slice(&self.data[src..src + cols]);
        }
        res
    }

    pub fn flip_horizontal(&self) -> Matrix {
        let mut res = self.clone();
        for row in res.data.chunks_mut(self.cols.max(1)) {
            row.reverse();
        }
        res
    }

    /// Forward difference along columns: `out[i][j] = m[i][j+1] - m[i][j]`.
    pub fn diff_x(&self) -> Matrix {
        let cols = self.cols.saturating_sub(1);
        let mut res = Matrix::zeros(self.rows, cols);
        for i in 0..self.rows {
            for j in 0..cols {
                res.set(i, j, self.get(i, j + 1) - self.get(i, j));
            }
        }
        res
    }

    /// Forward difference along rows: `out[i][j] = m[i+1][j] - m[i][j]`.
    pub fn diff_y(&self) -> Matrix {
        let rows = self.rows.saturating_sub(1);
        let mut res = Matrix::zeros(rows, self.cols);
        for i in 0..rows {
            for j in 0..self.cols {
                res.set(i, j, self.get(i + 1, j) - self.get(i, j));
            }
        }
        res
    }
}

impl Matrix {
    /// Adjoint of `diff_x`: maps a gradient on the `rows × (cols−1)`
    /// difference back onto the `rows × cols` source.
    pub fn diff_x_adjoint(&self, cols: usize) -> Matrix {
        let mut res = Matrix::zeros(self.rows, cols);
        for i in 0..self.rows {
            for j in 0..self.cols {
                let g = self.get(i, j);
                res.data[i * cols + j + 1] += g;
                res.data[i * cols + j] -= g;
            }
        }
        res
    }

    /// Adjoint of `diff_y`.
    pub fn diff_y_adjoint(&self, rows: usize) -> Matrix {
        let mut res = Matrix::zeros(rows, self.cols);
        for i in 0..self.rows {
            for j in 0..self.cols {
                let g = self.get(i, j);
                res.data[(i + 1) * self.cols + j] += g;
                res.data[i * self.cols + j] -= g;
            }
        }
        res
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix {
            rows: 0,
            cols: 0,
            data: vec![],
        }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(self, rhs: Self) -> Self::Output {
        self.zip_map(&rhs, |a, b| a + b)
    }
}

impl Sub for Matrix {
    type Output = Matrix;

    fn sub(self, rhs: Self) -> Self::Output {
        self.zip_map(&rhs, |a, b| a - b)
    }
}

impl Mul<f64> for Matrix {
    type Output = Matrix;

    fn mul(self, rhs: f64) -> Self::Output {
        self.map(|x| x * rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adaptive_pool_halves_by_block_average() {
        let m = Matrix::from_data(vec![
            vec![1.0, 3.0, 5.0, 7.0],
            vec![1.0, 3.0, 5.0, 7.0],
        ]);
        let p = m.adaptive_avg_pool(1, 2);
        assert_eq!(p.data, vec![2.0, 6.0]);
    }

    #[test]
    fn second_differences_of_a_ramp_vanish() {
        let m = Matrix::from_data(vec![vec![0.0, 1.0, 2.0, 3.0]; 3]);
        assert!(m.diff_x().diff_x().data.iter().all(|&v| v == 0.0));
        assert!(m.diff_y().data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn adjoint_satisfies_inner_product_identity() {
        let m = Matrix::from_data(vec![vec![1.0, -2.0, 0.5], vec![3.0, 0.0, 4.0]]);
        let gx = Matrix::from_data(vec![vec![0.3, -1.0], vec![2.0, 0.7]]);
        let lhs: f64 = m.diff_x().data.iter().zip(&gx.data).map(|(a, b)| a * b).sum();
        let rhs: f64 = m.data.iter().zip(&gx.diff_x_adjoint(3).data).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-12);

        let gy = Matrix::from_data(vec![vec![1.5, -0.5, 2.0]]);
        let lhs: f64 = m.diff_y().data.iter().zip(&gy.data).map(|(a, b)| a * b).sum();
        let rhs: f64 = m.data.iter().zip(&gy.diff_y_adjoint(2).data).map(|(a, b)| a * b).sum();
        assert!((lhs - rhs).abs() < 1e-12);
    }

    #[test]
    fn crop_and_flip() {
        let m = Matrix::from_data(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(m.crop(1, 1, 1, 2).data, vec![5.0, 6.0]);
        assert_eq!(m.flip_horizontal().data, vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }
}
