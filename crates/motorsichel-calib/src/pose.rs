use motorsichel_core::estimate_homography;
use nalgebra::{DVector, Point2, Point3, Vector3};

use crate::camera::{project_point, undistort_to_normalized, Distortion, Intrinsics, Pose};
use crate::lm::{minimize, ResidualModel, SolveOptions};

struct PnpModel<'a> {
    k: Intrinsics,
    d: Distortion,
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
}

fn pose_from_params(x: &DVector<f64>) -> Pose {
    Pose {
        rvec: Vector3::new(x[0], x[1], x[2]),
        tvec: Vector3::new(x[3], x[4], x[5]),
    }
}

impl ResidualModel for PnpModel<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let pose = pose_from_params(x);
        let mut r = Vec::with_capacity(2 * self.object.len());
        for (obj, img) in self.object.iter().zip(self.image) {
            let p = project_point(&self.k, &self.d, &pose, obj);
            r.push(p.x - img.x);
            r.push(p.y - img.y);
        }
        DVector::from_vec(r)
    }
}

/// Pose of a planar (`z = 0`) target from 2D-3D correspondences.
///
/// Initialized from the homography between the board plane and the
/// undistorted normalized image points, then refined by minimizing the
/// reprojection error. `None` if the correspondences are degenerate or the
/// solution places the board behind the camera.
pub fn solve_pnp(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    k: &Intrinsics,
    d: &Distortion,
) -> Option<Pose> {
    if object.len() != image.len() || object.len() < 4 || !k.is_valid() {
        return None;
    }
    let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let normalized: Vec<Point2<f64>> = image
        .iter()
        .map(|p| undistort_to_normalized(k, d, p))
        .collect();
    let h = estimate_homography(&plane, &normalized)?;
    let unit = Intrinsics {
        fx: 1.0,
        fy: 1.0,
        cx: 0.0,
        cy: 0.0,
    };
    let init = Pose::from_homography(&unit, &h)?;

    let model = PnpModel {
        k: *k,
        d: *d,
        object,
        image,
    };
    let x0 = DVector::from_iterator(6, init.rvec.iter().chain(init.tvec.iter()).copied());
    let (x, _) = minimize(&model, x0, &SolveOptions::default());
    let pose = pose_from_params(&x);
    (x.iter().all(|v| v.is_finite()) && pose.tvec.z > 0.0).then_some(pose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn recovers_pose_through_distortion() {
        let k = Intrinsics {
            fx: 900.0,
            fy: 900.0,
            cx: 400.0,
            cy: 300.0,
        };
        let d = Distortion {
            k1: -0.08,
            p2: 0.001,
            ..Default::default()
        };
        let truth = Pose {
            rvec: Vector3::new(-0.3, 0.2, 0.1),
            tvec: Vector3::new(-60.0, -40.0, 700.0),
        };
        let object: Vec<Point3<f64>> = (0..48)
            .map(|i| Point3::new((i % 6) as f64 * 20.0, (i / 6) as f64 * 20.0, 0.0))
            .collect();
        let image: Vec<Point2<f64>> = object
            .iter()
            .map(|p| project_point(&k, &d, &truth, p))
            .collect();

        let pose = solve_pnp(&object, &image, &k, &d).expect("pose");
        assert_relative_eq!(pose.tvec, truth.tvec, epsilon = 1e-4);
        assert_relative_eq!(pose.rvec, truth.rvec, epsilon = 1e-6);
        assert_relative_eq!(pose.distance(), truth.tvec.norm(), epsilon = 1e-4);
    }

    #[test]
    fn too_few_points_have_no_pose() {
        let k = Intrinsics {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
        };
        let obj = [Point3::origin(); 3];
        let img = [Point2::origin(); 3];
        assert!(solve_pnp(&obj, &img, &k, &Distortion::default()).is_none());
    }
}
