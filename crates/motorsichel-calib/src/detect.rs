use chess_corners::{find_chess_corners_image, ChessConfig, CornerDescriptor};
use image::GrayImage;
use log::debug;
use motorsichel_core::gray_view;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::grid::{assemble_grid, ChessCorner, GridParams};
use crate::subpix::{refine_corners, SubPixParams};
use crate::CheckerboardSpec;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    pub grid: GridParams,
    pub subpix: SubPixParams,
}

fn chess_config() -> ChessConfig {
    let mut cfg = ChessConfig::single_scale();
    cfg.params.threshold_rel = 0.2;
    cfg.params.nms_radius = 2;
    cfg
}

fn adapt_chess_corner(c: &CornerDescriptor) -> ChessCorner {
    ChessCorner {
        position: Point2::new(c.x, c.y),
        orientation: c.orientation,
        strength: c.response,
    }
}

/// Raw ChESS corner responses of a grayscale frame.
pub fn detect_chess_corners(img: &GrayImage) -> Vec<ChessCorner> {
    find_chess_corners_image(img, &chess_config())
        .iter()
        .map(adapt_chess_corner)
        .collect()
}

/// Locate the full inner-corner grid of `board` and refine it to sub-pixel
/// accuracy. Points come back in board index order.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, board, params), fields(width = img.width(), height = img.height()))
)]
pub fn detect_checkerboard(
    img: &GrayImage,
    board: &CheckerboardSpec,
    params: &DetectParams,
) -> Option<Vec<Point2<f64>>> {
    let corners = detect_chess_corners(img);
    debug!("{} raw ChESS corners", corners.len());
    let coarse = assemble_grid(&corners, board.rows, board.cols, &params.grid)?;
    let refined = refine_corners(&gray_view(img), &coarse, &params.subpix);
    Some(
        refined
            .into_iter()
            .map(|p| Point2::new(p.x as f64, p.y as f64))
            .collect(),
    )
}
