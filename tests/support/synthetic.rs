//! Synthetic images and a matching extractor with well separated classes.

use melonml::blob::{BlobStore, Visibility};
use melonml::dataset::annotations::BoundingBox;
use melonml::dataset::extractor::FeatureExtractor;
use melonml::dataset::{DatasetSplit, LabeledDataset, TaskType};

pub const ANNOTATION_HEADER: &str =
    "filename,set,detection_class,ripeness_class,bbox_cx,bbox_cy,bbox_w,bbox_h\n";

/// Reads `melon-<n>` / `non_melon-<n>` image bytes.
pub struct SyntheticExtractor;

impl FeatureExtractor for SyntheticExtractor {
    fn extract_image(&self, image: &[u8]) -> Result<Vec<f32>, String> {
        let text = std::str::from_utf8(image).map_err(|err| err.to_string())?;
        let (label, idx) = text.split_once('-').ok_or("not a synthetic image")?;
        let idx: usize = idx.parse().map_err(|_| "bad index".to_string())?;
        let base = if label == "melon" { 4.0 } else { -4.0 };
        Ok((0..TaskType::Detector.feature_count())
            .map(|f| base + ((idx + f) % 5) as f32 * 0.3)
            .collect())
    }

    fn extract_region(&self, _image: &[u8], bbox: &BoundingBox) -> Result<Vec<f32>, String> {
        // Ripe boxes are drawn wide, unripe ones narrow.
        let base = if bbox.w > 0.2 { 3.0 } else { -3.0 };
        Ok((0..TaskType::Classifier.feature_count())
            .map(|f| base + bbox.cx * (1 + f % 4) as f32)
            .collect())
    }
}

/// One annotated image.
pub struct ImageSpec {
    pub name: String,
    pub melon: bool,
    /// `(ripe, cx)` per box; ignored for non-melon images.
    pub boxes: Vec<(bool, f32)>,
}

impl ImageSpec {
    pub fn melon(idx: usize, boxes: Vec<(bool, f32)>) -> Self {
        Self {
            name: format!("images/melon_{idx}.jpg"),
            melon: true,
            boxes,
        }
    }

    pub fn non_melon(idx: usize) -> Self {
        Self {
            name: format!("images/other_{idx}.jpg"),
            melon: false,
            boxes: Vec::new(),
        }
    }
}

/// Write the annotation file for `split` and the images it references.
pub fn seed_split(store: &dyn BlobStore, split: DatasetSplit, images: &[ImageSpec]) {
    let mut csv = String::from(ANNOTATION_HEADER);
    for (idx, image) in images.iter().enumerate() {
        let label = if image.melon { "melon" } else { "non_melon" };
        if image.melon && !image.boxes.is_empty() {
            for &(ripe, cx) in &image.boxes {
                let (ripeness, w) = if ripe { ("ripe", 0.3) } else { ("unripe", 0.1) };
                csv.push_str(&format!(
                    "{},{split},melon,{ripeness},{cx},0.5,{w},0.2\n",
                    image.name
                ));
            }
        } else {
            csv.push_str(&format!("{},{split},{label},,,,,\n", image.name));
        }
        store
            .put(
                &format!("dataset/{}", image.name),
                format!("{label}-{idx}").as_bytes(),
                Visibility::Private,
            )
            .unwrap();
    }
    store
        .put(
            &format!("dataset/annotations/{split}_annotations.csv"),
            csv.as_bytes(),
            Visibility::Private,
        )
        .unwrap();
}

/// `melons` melon images (one box each, alternating ripeness) and `others` non-melon images.
pub fn images(melons: usize, others: usize) -> Vec<ImageSpec> {
    let mut images: Vec<ImageSpec> = (0..melons)
        .map(|idx| ImageSpec::melon(idx, vec![(idx % 2 == 0, 0.1 + (idx % 8) as f32 * 0.1)]))
        .collect();
    images.extend((0..others).map(ImageSpec::non_melon));
    images
}

/// Detector dataset centred on `offset`, class 0 above it and class 1 below.
pub fn detector_blobs(per_class: usize, offset: f32) -> LabeledDataset {
    let mut data = LabeledDataset::for_task(TaskType::Detector);
    for i in 0..per_class {
        let t = (i % 5) as f32 * 0.2;
        data.push(vec![offset + 4.0 + t; 8], 0);
        data.push(vec![offset - 4.0 - t; 8], 1);
    }
    data
}
