//! Pinhole camera with five-coefficient Brown-Conrady distortion.

use motorsichel_core::Homography;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Skew is ignored.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    #[inline]
    pub fn to_pixel(&self, x: f64, y: f64) -> Point2<f64> {
        Point2::new(self.fx * x + self.cx, self.fy * y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, p: &Point2<f64>) -> (f64, f64) {
        ((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Radial `k1, k2, k3` and tangential `p1, p2` coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Coefficients in the conventional `[k1, k2, p1, p2, k3]` order.
    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_coefficients(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    #[inline]
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        (
            x * radial + 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy,
        )
    }

    /// Fixed-point inverse of [`Distortion::distort`].
    pub fn undistort(&self, xd: f64, yd: f64) -> (f64, f64) {
        let (mut x, mut y) = (xd, yd);
        for _ in 0..20 {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            let xy = x * y;
            let dx = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
            x = (xd - dx) / radial;
            y = (yd - dy) / radial;
        }
        (x, y)
    }
}

/// Board-to-camera rigid transform as a Rodrigues vector and a translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

impl Pose {
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }

    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.tvec
    }

    /// Camera-to-board distance in board units.
    pub fn distance(&self) -> f64 {
        self.tvec.norm()
    }

    /// Decompose a plane homography `H ~ K [r1 r2 t]` for a board on `Z = 0`.
    ///
    /// The rotation is projected onto SO(3) and the sign is fixed so that the
    /// board lies in front of the camera.
    pub fn from_homography(k: &Intrinsics, h: &Homography) -> Option<Self> {
        let k_inv = k.matrix().try_inverse()?;
        let a1 = k_inv * h.h.column(0);
        let a2 = k_inv * h.h.column(1);
        let a3 = k_inv * h.h.column(2);
        let norm = 0.5 * (a1.norm() + a2.norm());
        if norm < 1e-12 {
            return None;
        }
        let lambda = if a3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

        let r1 = a1 * lambda;
        let r2 = a2 * lambda;
        let r = Matrix3::from_columns(&[r1, r2, r1.cross(&r2)]);
        let svd = r.svd(true, true);
        let (u, v_t) = (svd.u?, svd.v_t?);
        let mut r_orth = u * v_t;
        if r_orth.determinant() < 0.0 {
            let mut u_flipped = u;
            u_flipped.column_mut(2).neg_mut();
            r_orth = u_flipped * v_t;
        }
        let rotation = Rotation3::from_matrix_unchecked(r_orth);
        Some(Self {
            rvec: rotation.scaled_axis(),
            tvec: a3 * lambda,
        })
    }
}

/// Project a board point through pose, distortion and intrinsics.
#[inline]
pub fn project_point(k: &Intrinsics, d: &Distortion, pose: &Pose, p: &Point3<f64>) -> Point2<f64> {
    let c = pose.transform(p);
    let z = if c.z.abs() < 1e-12 { 1e-12 } else { c.z };
    let (xd, yd) = d.distort(c.x / z, c.y / z);
    k.to_pixel(xd, yd)
}

/// Map a distorted pixel to undistorted normalized coordinates.
#[inline]
pub fn undistort_to_normalized(k: &Intrinsics, d: &Distortion, p: &Point2<f64>) -> Point2<f64> {
    let (xd, yd) = k.to_normalized(p);
    let (x, y) = d.undistort(xd, yd);
    Point2::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use motorsichel_core::estimate_homography;

    fn k() -> Intrinsics {
        Intrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = Distortion {
            k1: -0.2,
            k2: 0.05,
            p1: 0.001,
            p2: -0.0005,
            k3: 0.0,
        };
        for &(x, y) in &[(0.1, -0.2), (-0.3, 0.25), (0.0, 0.0)] {
            let (xd, yd) = d.distort(x, y);
            let (xu, yu) = d.undistort(xd, yd);
            assert_relative_eq!(xu, x, epsilon = 1e-9);
            assert_relative_eq!(yu, y, epsilon = 1e-9);
        }
    }

    #[test]
    fn pose_from_homography_recovers_rigid_motion() {
        let truth = Pose {
            rvec: Vector3::new(0.2, -0.1, 0.05),
            tvec: Vector3::new(-40.0, -30.0, 600.0),
        };
        let board: Vec<Point3<f64>> = (0..48)
            .map(|k| Point3::new((k % 6) as f64 * 20.0, (k / 6) as f64 * 20.0, 0.0))
            .collect();
        let src: Vec<Point2<f64>> = board.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let dst: Vec<Point2<f64>> = board
            .iter()
            .map(|p| project_point(&k(), &Distortion::default(), &truth, p))
            .collect();
        let h = estimate_homography(&src, &dst).unwrap();
        let pose = Pose::from_homography(&k(), &h).unwrap();
        assert_relative_eq!(pose.tvec, truth.tvec, epsilon = 1e-5);
        assert_relative_eq!(pose.rvec, truth.rvec, epsilon = 1e-7);
    }

    #[test]
    fn projection_of_optical_axis_is_principal_point() {
        let pose = Pose {
            rvec: Vector3::zeros(),
            tvec: Vector3::new(0.0, 0.0, 100.0),
        };
        let p = project_point(&k(), &Distortion::default(), &pose, &Point3::origin());
        assert_eq!(p, Point2::new(320.0, 240.0));
    }
}
