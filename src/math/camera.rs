use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 3×3 pinhole camera matrix (or its inverse), row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics(pub [[f64; 3]; 3]);

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Intrinsics {
        Intrinsics([[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]])
    }

    pub fn identity() -> Intrinsics {
        Intrinsics::new(1.0, 1.0, 0.0, 0.0)
    }

    /// Parses nine whitespace-separated numbers (row-major), the `cam.txt` format.
    pub fn parse(text: &str) -> Result<Intrinsics> {
        let values = text
            .split_whitespace()
            .map(|t| {
                t.parse::<f64>()
                    .map_err(|_| Error::DataSource(format!("'{t}' is not a valid intrinsics value")))
            })
            .collect::<Result<Vec<f64>>>()?;
        if values.len() != 9 {
            return Err(Error::DataSource(format!(
                "intrinsics need 9 values, got {}",
                values.len()
            )));
        }
        let mut m = [[0.0; 3]; 3];
        for (i, v) in values.into_iter().enumerate() {
            m[i / 3][i % 3] = v;
        }
        Ok(Intrinsics(m))
    }

    pub fn inverse(&self) -> Result<Intrinsics> {
        let m = &self.0;
        let cof = |r0: usize, r1: usize, c0: usize, c1: usize| {
            m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
        };
        let det = m[0][0] * cof(1, 2, 1, 2) - m[0][1] * cof(1, 2, 0, 2) + m[0][2] * cof(1, 2, 0, 1);
        if det.abs() < 1e-12 || !det.is_finite() {
            return Err(Error::DataSource("camera intrinsics are singular".into()));
        }
        let inv = [
            [cof(1, 2, 1, 2), -cof(0, 2, 1, 2), cof(0, 1, 1, 2)],
            [-cof(1, 2, 0, 2), cof(0, 2, 0, 2), -cof(0, 1, 0, 2)],
            [cof(1, 2, 0, 1), -cof(0, 2, 0, 1), cof(0, 1, 0, 1)],
        ];
        Ok(Intrinsics(inv.map(|row| row.map(|v| v / det))))
    }

    /// Intrinsics for an image downscaled by `downscale`: the first two rows are divided.
    pub fn downscaled(&self, downscale: f64) -> Intrinsics {
        let mut m = self.0;
        for row in m.iter_mut().take(2) {
            for v in row.iter_mut() {
                *v /= downscale;
            }
        }
        Intrinsics(m)
    }

    /// Inverse intrinsics for an image downscaled by `downscale`: the first two columns are multiplied.
    pub fn inverse_downscaled(&self, downscale: f64) -> Intrinsics {
        let mut m = self.0;
        for row in m.iter_mut() {
            row[0] *= downscale;
            row[1] *= downscale;
        }
        Intrinsics(m)
    }

    /// Scales focal lengths and principal point independently per axis.
    pub fn scaled(&self, sx: f64, sy: f64) -> Intrinsics {
        let mut m = self.0;
        for v in m[0].iter_mut() {
            *v *= sx;
        }
        for v in m[1].iter_mut() {
            *v *= sy;
        }
        Intrinsics(m)
    }

    /// Shifts the principal point, as a crop of the image does.
    pub fn offset(&self, dx: f64, dy: f64) -> Intrinsics {
        let mut m = self.0;
        m[0][2] -= dx;
        m[1][2] -= dy;
        Intrinsics(m)
    }

    /// Principal point after a horizontal flip of an image of `width` pixels.
    pub fn flipped(&self, width: usize) -> Intrinsics {
        let mut m = self.0;
        m[0][2] = width as f64 - m[0][2];
        Intrinsics(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_round_trips_pinhole() {
        let k = Intrinsics::new(241.7, 246.3, 204.2, 59.0);
        let inv = k.inverse().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f64 = (0..3).map(|n| k.0[i][n] * inv.0[n][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(Intrinsics::parse("1 0 0 0 1 0").is_err());
        assert_eq!(
            Intrinsics::parse("2 0 1\n0 3 1\n0 0 1").unwrap(),
            Intrinsics::new(2.0, 3.0, 1.0, 1.0)
        );
    }

    #[test]
    fn singular_matrix_is_rejected() {
        assert!(Intrinsics([[0.0; 3]; 3]).inverse().is_err());
    }
}
