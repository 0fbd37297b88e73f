use image::DynamicImage;
use imageproc::filter::gaussian_blur_f32;
use motorsichel_calib::{
    detect_checkerboard, mm_per_px_from_grid, recover_scale, CalibrationProfile, CheckerboardSpec,
    DetectParams, Distortion, Intrinsics,
};
use motorsichel_core::PixelRect;

const PX_PER_SQUARE: u32 = 40;
const MARGIN: u32 = 60;

fn rendered_board(board: &CheckerboardSpec) -> image::GrayImage {
    gaussian_blur_f32(&board.render(PX_PER_SQUARE, MARGIN), 1.0)
}

#[test]
fn detects_rendered_board_in_index_order() {
    let board = CheckerboardSpec::default();
    let img = rendered_board(&board);
    let points = detect_checkerboard(&img, &board, &DetectParams::default())
        .expect("checkerboard detected");
    assert_eq!(points.len(), board.point_count());

    // Inner corners sit on square boundaries, fast index along x.
    let first = points[0];
    let expected = (MARGIN + PX_PER_SQUARE) as f64;
    assert!((first.x - expected).abs() < 1.0, "first corner {first:?}");
    assert!((first.y - expected).abs() < 1.0, "first corner {first:?}");
    assert!(points[1].x > first.x + 30.0);
    assert!((points[board.rows as usize].y - first.y - PX_PER_SQUARE as f64).abs() < 1.0);
}

#[test]
fn rendered_board_scale_matches_square_size() {
    let board = CheckerboardSpec::new(6, 8, 20.0).expect("board");
    let img = rendered_board(&board);
    let points = detect_checkerboard(&img, &board, &DetectParams::default())
        .expect("checkerboard detected");
    let ratio = mm_per_px_from_grid(&points, &board).expect("ratio");
    let expected = 20.0 / PX_PER_SQUARE as f64;
    assert!(
        (ratio.get() - expected).abs() / expected < 0.01,
        "mm/px {} vs {expected}",
        ratio.get()
    );
}

#[test]
fn fronto_parallel_board_distance_follows_focal_length() {
    let board = CheckerboardSpec::default();
    let img = rendered_board(&board);
    let (w, h) = img.dimensions();
    let k = Intrinsics {
        fx: 1000.0,
        fy: 1000.0,
        cx: w as f64 / 2.0,
        cy: h as f64 / 2.0,
    };
    let profile = CalibrationProfile {
        image_size: (w, h),
        camera_matrix: k.matrix(),
        optimal_matrix: k.matrix(),
        distortion: Distortion::default(),
        rvecs: Vec::new(),
        tvecs: Vec::new(),
        roi: PixelRect::new(0, 0, w, h),
        mean_error: 0.0,
        board,
    };

    let photo = DynamicImage::ImageLuma8(img);
    let estimate =
        recover_scale(&photo, &profile, &DetectParams::default()).expect("scale recovered");
    // A square of s mm imaged at p px lies at Z = f * s / p; the board origin
    // is the first inner corner, off the optical axis.
    let z = 1000.0 * board.square_size_mm / PX_PER_SQUARE as f64;
    let origin = (MARGIN + PX_PER_SQUARE) as f64;
    let expected = nalgebra::Vector3::new(
        (origin - k.cx) / k.fx * z,
        (origin - k.cy) / k.fy * z,
        z,
    )
    .norm();
    assert!(
        (estimate.object_distance_mm - expected).abs() / expected < 0.01,
        "distance {} vs {expected}",
        estimate.object_distance_mm
    );
    assert!((estimate.mm_per_px.get() - 0.5).abs() < 0.01);
}
