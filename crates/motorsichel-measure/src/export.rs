//! DXF export of the finalized contour list.
//!
//! Holes become circles on `HoleLayer`, every other outline a closed
//! lightweight polyline on `ContourLayer`. Coordinates are millimeters with
//! the Y axis pointing up.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dxf::entities::{Circle, Entity, EntityCommon, EntityType, LwPolyline};
use dxf::enums::{AcadVersion, Units};
use dxf::tables::Layer;
use dxf::{Drawing, LwPolylineVertex};
use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::reference::flip_y;
use crate::{Contour, ExportError};

pub const HOLE_LAYER: &str = "HoleLayer";
pub const CONTOUR_LAYER: &str = "ContourLayer";
pub const DEFAULT_DRAWING_STEM: &str = "AVL_motorsichel";

/// Optional part identification used to name output files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingName {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl DrawingName {
    pub fn new(manufacturer: Option<String>, model: Option<String>) -> Self {
        Self {
            manufacturer: manufacturer.filter(|s| !s.is_empty()),
            model: model.filter(|s| !s.is_empty()),
        }
    }

    /// `manufacturer_model` when both are known, the default name otherwise.
    pub fn drawing_stem(&self) -> String {
        match (&self.manufacturer, &self.model) {
            (Some(manufacturer), Some(model)) => format!("{manufacturer}_{model}"),
            _ => DEFAULT_DRAWING_STEM.to_owned(),
        }
    }

    /// `<manufacturer><model>_reference`, or `reference` without either.
    pub fn report_stem(&self) -> String {
        let prefix = format!(
            "{}{}",
            self.manufacturer.as_deref().unwrap_or(""),
            self.model.as_deref().unwrap_or("")
        );
        if prefix.is_empty() {
            "reference".to_owned()
        } else {
            format!("{prefix}_reference")
        }
    }
}

/// First stem of `stem`, `stem#1`, `stem#2`, ... with no file for any of
/// `exts` in `dir`.
pub(crate) fn free_stem(dir: &Path, stem: &str, exts: &[&str]) -> String {
    let taken = |s: &str| exts.iter().any(|e| dir.join(format!("{s}.{e}")).exists());
    if !taken(stem) {
        return stem.to_owned();
    }
    (1u32..)
        .map(|n| format!("{stem}#{n}"))
        .find(|s| !taken(s))
        .unwrap_or_else(|| stem.to_owned())
}

/// First free `stem.ext`, `stem#1.ext`, `stem#2.ext`, ... in `dir`.
pub fn next_free_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{ext}", free_stem(dir, stem, &[ext])))
}

/// Build the drawing for an already Y-flipped contour list.
fn build_drawing(contours: &[Contour]) -> Result<Drawing, ExportError> {
    let mut drawing = Drawing::new();
    drawing.header.version = AcadVersion::R2010;
    drawing.header.default_drawing_units = Units::Millimeters;
    for name in [HOLE_LAYER, CONTOUR_LAYER] {
        drawing.add_layer(Layer {
            name: name.to_owned(),
            ..Default::default()
        });
    }

    for c in contours {
        let specific = if c.is_hole {
            let (Some(center), Some(diameter)) = (c.center_mm, c.diameter_mm) else {
                return Err(ExportError::MissingHoleGeometry(c.index));
            };
            EntityType::Circle(Circle::new(
                dxf::Point::new(center.x, center.y, 0.0),
                diameter / 2.0,
            ))
        } else {
            let points = c.points_mm.as_deref().unwrap_or_default();
            let mut polyline = LwPolyline::default();
            // Closed by repeating the first vertex.
            for p in points.iter().chain(points.first()) {
                polyline.vertices.push(LwPolylineVertex {
                    x: p.x,
                    y: p.y,
                    ..Default::default()
                });
            }
            EntityType::LwPolyline(polyline)
        };
        let layer = if c.is_hole { HOLE_LAYER } else { CONTOUR_LAYER };
        drawing.add_entity(Entity {
            common: EntityCommon {
                layer: layer.to_owned(),
                ..Default::default()
            },
            specific,
        });
    }
    Ok(drawing)
}

/// Write `contours` as a DXF drawing into `dir` and return the path used.
///
/// The contours must carry millimeter coordinates. They are flipped on a
/// copy, so exporting twice writes the same geometry. The file is written
/// to a temporary sibling and renamed into place.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(contours), fields(n = contours.len())))]
pub fn export_drawing(
    contours: &[Contour],
    dir: &Path,
    name: &DrawingName,
) -> Result<PathBuf, ExportError> {
    let mut flipped = contours.to_vec();
    flip_y(&mut flipped)?;
    let drawing = build_drawing(&flipped)?;

    std::fs::create_dir_all(dir)?;
    let path = next_free_path(dir, &name.drawing_stem(), "dxf");
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        drawing.save(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(&path)?;

    let holes = contours.iter().filter(|c| c.is_hole).count();
    info!(
        "exported {holes} holes and {} outlines to {}",
        contours.len() - holes,
        path.display()
    );
    Ok(path)
}
