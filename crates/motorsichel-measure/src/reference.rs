//! Reference-point re-origination, millimeter conversion and the CAD axis
//! flip.

use log::debug;
use motorsichel_core::{round_to, MmPerPx, Reorigin};
use nalgebra::Point2;

use crate::{Contour, ReferenceError};

/// Express every contour relative to `reference`: the center and each
/// outline point become `coordinate - reference`.
pub fn transform_all(
    contours: &mut [Contour],
    reference: Option<&Point2<f64>>,
) -> Result<(), ReferenceError> {
    if contours.is_empty() {
        return Err(ReferenceError::NoContours);
    }
    let reference = reference.ok_or(ReferenceError::NoReference)?;
    for c in contours.iter_mut() {
        c.center_ref = Some(c.center_px.reorigin(reference));
        c.points_ref = Some(c.points_px.reorigin(reference));
        // Stale until converted again.
        c.points_mm = None;
        c.center_mm = None;
    }
    debug!("{} contours moved to origin {reference}", contours.len());
    Ok(())
}

/// Scale reference-space outlines (and hole centers) to millimeters.
///
/// Needs a prior [`transform_all`] and a mm/px ratio. Measured diameters and
/// deviations are recomputed with `mm_per_px`; manual corrections are kept.
pub fn convert_to_millimeters(
    contours: &mut [Contour],
    mm_per_px: Option<MmPerPx>,
) -> Result<(), ReferenceError> {
    if contours.is_empty() {
        return Err(ReferenceError::NoContours);
    }
    let k = mm_per_px.ok_or(ReferenceError::NoScale)?;
    if let Some(c) = contours
        .iter()
        .find(|c| c.points_ref.is_none() || c.center_ref.is_none())
    {
        return Err(ReferenceError::NotTransformed(c.index));
    }
    for c in contours.iter_mut() {
        c.points_mm = c
            .points_ref
            .as_ref()
            .map(|pts| pts.iter().map(|p| k.point_to_mm(p)).collect());
        c.center_mm = if c.is_hole {
            c.center_ref.map(|p| k.point_to_mm(&p))
        } else {
            None
        };
        if !c.set_diameter_manually {
            c.diameter_mm = Some(round_to(k.to_mm(c.average_diameter_px), 2));
        }
        c.deviation_mm = Some(round_to(k.to_mm(c.deviation_px), 2));
    }
    Ok(())
}

/// Negate the millimeter Y coordinate of every outline point and hole
/// center. Applying it twice restores the input exactly.
pub fn flip_y(contours: &mut [Contour]) -> Result<(), ReferenceError> {
    if let Some(c) = contours
        .iter()
        .find(|c| c.points_mm.is_none() || (c.is_hole && c.center_mm.is_none()))
    {
        return Err(ReferenceError::NotConverted(c.index));
    }
    for c in contours.iter_mut() {
        if let Some(points) = c.points_mm.as_mut() {
            for p in points.iter_mut() {
                p.y = -p.y;
            }
        }
        if c.is_hole {
            if let Some(center) = c.center_mm.as_mut() {
                center.y = -center.y;
            }
        }
    }
    Ok(())
}
