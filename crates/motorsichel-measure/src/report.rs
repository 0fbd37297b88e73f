//! Reference report: a text sidecar describing every hole plus the shoot
//! metadata, and the photo with each hole boxed and numbered.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{imageops, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::export::{free_stem, DrawingName};
use crate::morphology::MorphMode;
use crate::{Contour, ExportError};

const BOX_COLOR: Rgb<u8> = Rgb([255, 128, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Everything about the shoot that is written below the hole list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShootMetadata {
    pub name: DrawingName,
    pub camera_owner: String,
    pub camera_name: String,
    pub lens_name: String,
    pub focal_length_mm: f64,
    pub scale_factor: f64,
    pub pre_crop: (u32, u32),
    pub post_crop: (u32, u32),
    /// Inner corners per row and per column.
    pub board_cols: u32,
    pub board_rows: u32,
    pub square_size_mm: f64,
    pub mm_per_px: f64,
    pub mean_error: f64,
    pub object_distance_mm: f64,
    pub reference_point: Option<Point2<f64>>,
    pub roundness_threshold: f64,
    pub morph: MorphMode,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportPaths {
    pub text: PathBuf,
    pub image: PathBuf,
}

fn opt<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "None".to_owned(), ToString::to_string)
}

fn opt_points(points: &Option<Vec<Point2<f64>>>) -> String {
    points
        .as_ref()
        .map_or_else(|| "None".to_owned(), |p| format!("({})", p.len()))
}

fn point(p: &Point2<f64>) -> String {
    format!("({}, {})", p.x, p.y)
}

struct ReportText<'a> {
    contours: &'a [Contour],
    meta: &'a ShootMetadata,
}

impl fmt::Display for ReportText<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.contours.iter().filter(|c| c.is_hole) {
            write_hole(out, c)?;
        }
        write_metadata(out, self.meta)
    }
}

fn write_hole(out: &mut fmt::Formatter<'_>, c: &Contour) -> fmt::Result {
    let rows = [
        ("index", c.index.to_string()),
        ("points_px", format!("({})", c.points_px.len())),
        ("points_ref", opt_points(&c.points_ref)),
        ("points_mm", opt_points(&c.points_mm)),
        ("center_px", point(&c.center_px)),
        ("center_ref", opt(&c.center_ref.as_ref().map(point))),
        ("center_mm", opt(&c.center_mm.as_ref().map(point))),
        ("area_px", c.area_px.to_string()),
        ("perimeter_px", c.perimeter_px.to_string()),
        ("roundness", c.roundness.to_string()),
        ("is_hole", c.is_hole.to_string()),
        ("diameter_px", c.diameter_px.to_string()),
        ("average_diameter_px", c.average_diameter_px.to_string()),
        ("diameter_mm", opt(&c.diameter_mm)),
        ("deviation_px", c.deviation_px.to_string()),
        ("deviation_mm", opt(&c.deviation_mm)),
        ("set_diameter_manually", c.set_diameter_manually.to_string()),
    ];
    writeln!(out, "Contour Nr:{}", c.index)?;
    for (key, value) in rows {
        writeln!(out, "{key}\t{value}")?;
    }
    writeln!(out)
}

fn write_metadata(out: &mut fmt::Formatter<'_>, m: &ShootMetadata) -> fmt::Result {
    let lines = [
        ("Manufacturer", opt(&m.name.manufacturer)),
        ("Model", opt(&m.name.model)),
        ("Camera owner", m.camera_owner.clone()),
        ("Camera name", m.camera_name.clone()),
        ("Lens name", m.lens_name.clone()),
        ("Focal length", format!("{} mm", m.focal_length_mm)),
        ("Image scale factor", m.scale_factor.to_string()),
        ("Resolution before crop", format!("{}x{}", m.pre_crop.0, m.pre_crop.1)),
        ("Resolution after crop", format!("{}x{}", m.post_crop.0, m.post_crop.1)),
        ("Chessboard size", format!("{}x{}", m.board_cols, m.board_rows)),
        ("Chessboard square size", format!("{} mm", m.square_size_mm)),
        ("mm/Pixel ratio", m.mm_per_px.to_string()),
        ("Mean error", m.mean_error.to_string()),
        ("Distance to object", format!("{} mm", m.object_distance_mm)),
        ("Reference point", opt(&m.reference_point.as_ref().map(point))),
        ("Roundness threshold", m.roundness_threshold.to_string()),
        ("Morphology mode", m.morph.label().to_owned()),
    ];
    for (key, value) in lines {
        writeln!(out, "{key}: {value}")?;
    }
    Ok(())
}

/// Report text: one block per hole, then the metadata.
pub fn render_report_text(contours: &[Contour], meta: &ShootMetadata) -> String {
    ReportText { contours, meta }.to_string()
}

// Segments a..g, clockwise from the top, g in the middle.
const SEGMENTS: [u8; 10] = [
    0b011_1111, 0b000_0110, 0b101_1011, 0b100_1111, 0b110_0110,
    0b110_1101, 0b111_1101, 0b000_0111, 0b111_1111, 0b110_1111,
];

fn draw_digit(img: &mut RgbImage, digit: u8, x: f32, y: f32, h: f32, color: Rgb<u8>) {
    let w = h / 2.0;
    let m = y + h / 2.0;
    let ends = [
        ((x, y), (x + w, y)),
        ((x + w, y), (x + w, m)),
        ((x + w, m), (x + w, y + h)),
        ((x, y + h), (x + w, y + h)),
        ((x, m), (x, y + h)),
        ((x, y), (x, m)),
        ((x, m), (x + w, m)),
    ];
    let mask = SEGMENTS[usize::from(digit % 10)];
    for (bit, (a, b)) in ends.into_iter().enumerate() {
        if mask & (1 << bit) != 0 {
            draw_line_segment_mut(img, a, b, color);
        }
    }
}

/// Draw `number` with its top-left corner at `(x, y)`; glyphs are `h` px
/// tall and stroked `stroke` px wide.
fn draw_number(img: &mut RgbImage, number: usize, x: f32, y: f32, h: f32, stroke: u32) {
    let advance = h * 0.75;
    for (i, ch) in number.to_string().bytes().enumerate() {
        let gx = x + i as f32 * advance;
        for s in 0..stroke {
            draw_digit(img, ch - b'0', gx + s as f32, y + s as f32, h, LABEL_COLOR);
        }
    }
}

/// Grayscale copy of `photo` with each hole boxed and labeled with its index.
///
/// The box half-size is the stored `diameter_px`.
pub fn annotate_holes(photo: &RgbImage, contours: &[Contour], scale_factor: f64) -> RgbImage {
    let gray = imageops::grayscale(photo);
    let mut img = RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });
    let stroke = ((scale_factor * 10.0) as u32).max(1);
    let glyph_h = (12 * stroke) as f32;

    for c in contours.iter().filter(|c| c.is_hole) {
        let (cx, cy) = (c.center_px.x as i32, c.center_px.y as i32);
        let r = c.diameter_px as i32;
        for t in 0..stroke as i32 {
            let side = (2 * (r - t)).max(1) as u32;
            let rect = Rect::at(cx - r + t, cy - r + t).of_size(side, side);
            draw_hollow_rect_mut(&mut img, rect, BOX_COLOR);
        }
        draw_number(
            &mut img,
            c.index,
            (cx + 2 * r) as f32,
            (cy + r) as f32,
            glyph_h,
            stroke,
        );
    }
    img
}

/// Write the report text and annotated image into `dir` as
/// `<stem>[#N].txt` and `<stem>[#N].jpg`, sharing the first free suffix.
pub fn write_reference_report(
    dir: &Path,
    contours: &[Contour],
    photo: &RgbImage,
    meta: &ShootMetadata,
) -> Result<ReportPaths, ExportError> {
    std::fs::create_dir_all(dir)?;
    let stem = free_stem(dir, &meta.name.report_stem(), &["txt", "jpg"]);
    let paths = ReportPaths {
        text: dir.join(format!("{stem}.txt")),
        image: dir.join(format!("{stem}.jpg")),
    };

    let text = render_report_text(contours, meta);
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
    }
    tmp.persist(&paths.text)?;

    let annotated = annotate_holes(photo, contours, meta.scale_factor);
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        annotated.write_to(&mut writer, ImageFormat::Jpeg)?;
        writer.flush()?;
    }
    tmp.persist(&paths.image)?;

    info!("reference report written to {}", paths.text.display());
    Ok(paths)
}
