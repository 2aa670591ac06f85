//! Annotation CSV parsing and per-image grouping.
//!
//! One row per labeled region (or a single row per image when there is no
//! box). Rows for the same image are grouped in first-seen order and keep their
//! source order, which fixes the `_bboxN` numbering of region identifiers.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

/// Columns every annotation file must carry (order is free).
pub const ANNOTATION_HEADER: [&str; 8] = [
    "filename",
    "set",
    "detection_class",
    "ripeness_class",
    "bbox_cx",
    "bbox_cy",
    "bbox_w",
    "bbox_h",
];

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("Failed to parse annotation CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("Annotation CSV is missing columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },
}

/// Relative bounding box (`cx`, `cy` centre; `w`, `h` extent), all in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Parse and validate the four bbox fields; `None` if any is missing or out of range.
    pub fn parse(cx: &str, cy: &str, w: &str, h: &str) -> Option<Self> {
        let parse = |raw: &str| raw.trim().parse::<f32>().ok().filter(|v| v.is_finite());
        let bbox = Self {
            cx: parse(cx)?,
            cy: parse(cy)?,
            w: parse(w)?,
            h: parse(h)?,
        };
        bbox.is_valid().then_some(bbox)
    }

    /// All four values must lie in `(0, 1]`.
    pub fn is_valid(&self) -> bool {
        [self.cx, self.cy, self.w, self.h]
            .iter()
            .all(|value| *value > 0.0 && *value <= 1.0)
    }
}

/// One parsed annotation row.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    /// Image path as written in the file, with `\` normalised to `/`.
    pub filename: String,
    pub set: String,
    /// Lower-cased image-level label.
    pub detection_class: String,
    /// Lower-cased ripeness label; `None` when blank.
    pub ripeness_class: Option<String>,
    /// `None` when the row has no box or the box is invalid.
    pub bbox: Option<BoundingBox>,
}

/// All rows that belong to one image, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnnotations {
    pub image: String,
    pub rows: Vec<AnnotationRow>,
}

impl ImageAnnotations {
    /// File stem used as the base of region identifiers.
    pub fn base_name(&self) -> &str {
        let file = self.image.rsplit('/').next().unwrap_or(&self.image);
        match file.rfind('.') {
            Some(idx) if idx > 0 => &file[..idx],
            _ => file,
        }
    }
}

/// Parse an annotation CSV into rows.
///
/// Rows with an empty filename or a field count that does not match the
/// header are dropped with a warning; a missing required column fails the
/// whole file.
pub fn parse_annotations(bytes: &[u8]) -> Result<Vec<AnnotationRow>, AnnotationError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    let columns: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_ascii_lowercase(), idx))
        .collect();
    let missing: Vec<String> = ANNOTATION_HEADER
        .iter()
        .filter(|name| !columns.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AnnotationError::MissingColumns { missing });
    }
    let col = |name: &str| columns[name];

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            warn!(
                line = line + 2,
                fields = record.len(),
                expected = headers.len(),
                "Skipping annotation row with wrong field count"
            );
            continue;
        }
        let field = |name: &str| record.get(col(name)).unwrap_or("");
        let filename = field("filename").replace('\\', "/");
        if filename.is_empty() {
            continue;
        }
        let ripeness = field("ripeness_class").to_ascii_lowercase();
        rows.push(AnnotationRow {
            filename,
            set: field("set").to_ascii_lowercase(),
            detection_class: field("detection_class").to_ascii_lowercase(),
            ripeness_class: (!ripeness.is_empty()).then_some(ripeness),
            bbox: BoundingBox::parse(
                field("bbox_cx"),
                field("bbox_cy"),
                field("bbox_w"),
                field("bbox_h"),
            ),
        });
    }
    Ok(rows)
}

/// Group rows by image, preserving first-seen image order and row order.
pub fn group_by_image(rows: Vec<AnnotationRow>) -> Vec<ImageAnnotations> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<ImageAnnotations> = Vec::new();
    for row in rows {
        match index.get(&row.filename) {
            Some(&idx) => groups[idx].rows.push(row),
            None => {
                index.insert(row.filename.clone(), groups.len());
                groups.push(ImageAnnotations {
                    image: row.filename.clone(),
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

/// Blob key of an annotated image.
///
/// A filename that already starts with the dataset prefix is not prefixed
/// twice; repeated slashes are collapsed.
pub fn image_key(dataset_dir: &str, filename: &str) -> String {
    let dataset_dir = dataset_dir.trim_matches('/');
    let filename = filename.replace('\\', "/");
    let relative = filename
        .strip_prefix(&format!("{dataset_dir}/"))
        .unwrap_or(&filename);
    let joined = format!("{dataset_dir}/{relative}");
    joined
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
