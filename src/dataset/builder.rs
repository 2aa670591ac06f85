//! Feature Corpus Builder.
//!
//! Reads `{split}_annotations.csv`, extracts features for every image (detector)
//! and every valid box of a melon image (classifier) and writes the feature
//! files through scratch copies. A broken annotation file fails only its
//! split; failing to create scratch files aborts the run.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::annotations::{AnnotationError, ImageAnnotations, group_by_image, image_key, parse_annotations};
use super::extractor::FeatureExtractor;
use super::features::{FeatureRecord, FeatureStoreError, FeatureWriter, existing_keys, feature_file_key};
use super::labeled::{DatasetSplit, TaskType};
use crate::blob::{BlobError, BlobStore, Visibility, join_key, scratch::ScratchCopy};
use crate::config::LayoutSettings;
use crate::events::{EventStatus, ProgressSink, percent};

const PROGRESS_EVERY: usize = 5;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Annotation file {key} not found")]
    MissingAnnotations { key: String },
    #[error("Invalid annotation file {key}: {source}")]
    Annotations { key: String, source: AnnotationError },
    #[error(transparent)]
    Features(#[from] FeatureStoreError),
    #[error("Failed to write feature rows: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Blob(BlobError),
    /// Local scratch files cannot be created; nothing can be written.
    #[error("Cannot create scratch file: {0}")]
    Scratch(std::io::Error),
}

impl From<BlobError> for BuildError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Scratch(source) => BuildError::Scratch(source),
            other => BuildError::Blob(other),
        }
    }
}

impl BuildError {
    /// Fatal errors abort the whole run instead of a single split.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildError::Scratch(_))
    }
}

/// Whether existing feature rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Discard existing rows and rebuild every file.
    Full,
    /// Keep existing rows and only add identifiers not yet present.
    Incremental,
}

/// Written/skipped/errored counts for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTotals {
    pub written: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl TaskTotals {
    fn add(&mut self, other: &TaskTotals) {
        self.written += other.written;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }
}

/// Result of one completed split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    pub images_processed: usize,
    pub detector: TaskTotals,
    pub classifier: TaskTotals,
}

impl SplitReport {
    pub fn totals(&self, task: TaskType) -> &TaskTotals {
        match task {
            TaskType::Detector => &self.detector,
            TaskType::Classifier => &self.classifier,
        }
    }

    fn totals_mut(&mut self, task: TaskType) -> &mut TaskTotals {
        match task {
            TaskType::Detector => &mut self.detector,
            TaskType::Classifier => &mut self.classifier,
        }
    }
}

#[derive(Debug)]
pub enum SplitOutcome {
    Completed { split: DatasetSplit, report: SplitReport },
    Failed { split: DatasetSplit, error: BuildError },
}

/// Outcome of a builder run, one entry per requested split.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub splits: Vec<SplitOutcome>,
}

impl BuildReport {
    pub fn any_succeeded(&self) -> bool {
        self.splits
            .iter()
            .any(|outcome| matches!(outcome, SplitOutcome::Completed { .. }))
    }

    pub fn failed_splits(&self) -> usize {
        self.splits
            .iter()
            .filter(|outcome| matches!(outcome, SplitOutcome::Failed { .. }))
            .count()
    }

    pub fn report(&self, split: DatasetSplit) -> Option<&SplitReport> {
        self.splits.iter().find_map(|outcome| match outcome {
            SplitOutcome::Completed { split: s, report } if *s == split => Some(report),
            _ => None,
        })
    }

    /// Totals for `task` summed over completed splits.
    pub fn totals(&self, task: TaskType) -> TaskTotals {
        let mut totals = TaskTotals::default();
        for outcome in &self.splits {
            if let SplitOutcome::Completed { report, .. } = outcome {
                totals.add(report.totals(task));
            }
        }
        totals
    }

    pub fn images_processed(&self) -> usize {
        self.splits
            .iter()
            .filter_map(|outcome| match outcome {
                SplitOutcome::Completed { report, .. } => Some(report.images_processed),
                _ => None,
            })
            .sum()
    }
}

/// Builds feature files from annotations stored in a blob store.
pub struct FeatureCorpusBuilder<'a> {
    store: &'a dyn BlobStore,
    extractor: &'a dyn FeatureExtractor,
    sink: &'a dyn ProgressSink,
    layout: LayoutSettings,
    visibility: Visibility,
    scratch_dir: Option<PathBuf>,
}

impl<'a> FeatureCorpusBuilder<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        extractor: &'a dyn FeatureExtractor,
        sink: &'a dyn ProgressSink,
        layout: LayoutSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            sink,
            layout,
            visibility: Visibility::Private,
            scratch_dir: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Place scratch files in `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Process every split in order. Only fatal errors are returned as `Err`.
    pub fn run(
        &self,
        splits: &[DatasetSplit],
        tasks: &[TaskType],
        mode: BuildMode,
    ) -> Result<BuildReport, BuildError> {
        let mode_label = match mode {
            BuildMode::Full => "full",
            BuildMode::Incremental => "incremental",
        };
        self.sink.status(
            EventStatus::Start,
            &format!("Starting feature extraction ({mode_label})"),
        );
        let mut report = BuildReport::default();
        for &split in splits {
            self.sink.log(&format!("Processing set: {split}"));
            match self.build_split(split, tasks, mode) {
                Ok(split_report) => {
                    self.sink.log(&format!(
                        "Set '{split}' complete. Written det:{} cls:{}, skipped det:{} cls:{}, errors:{}",
                        split_report.detector.written,
                        split_report.classifier.written,
                        split_report.detector.skipped,
                        split_report.classifier.skipped,
                        split_report.detector.errors + split_report.classifier.errors,
                    ));
                    report.splits.push(SplitOutcome::Completed {
                        split,
                        report: split_report,
                    });
                }
                Err(err) if err.is_fatal() => {
                    error!(split = %split, "Feature extraction aborted: {err}");
                    self.sink
                        .status(EventStatus::Error, &format!("Feature extraction aborted: {err}"));
                    return Err(err);
                }
                Err(err) => {
                    error!(split = %split, "Set failed: {err}");
                    self.sink
                        .log(&format!("ERROR - processing failed for set '{split}': {err}"));
                    report.splits.push(SplitOutcome::Failed { split, error: err });
                }
            }
        }
        let errors: usize = TaskType::ALL
            .iter()
            .map(|&task| report.totals(task).errors)
            .sum::<usize>()
            + report.failed_splits();
        let summary = if errors > 0 {
            format!("Feature extraction finished with {errors} errors")
        } else {
            "Feature extraction finished".to_string()
        };
        self.sink.status(EventStatus::Done, &summary);
        Ok(report)
    }

    fn build_split(
        &self,
        split: DatasetSplit,
        tasks: &[TaskType],
        mode: BuildMode,
    ) -> Result<SplitReport, BuildError> {
        let key = join_key(&self.layout.annotations_dir, &format!("{split}_annotations.csv"));
        let bytes = self
            .store
            .get(&key)?
            .ok_or_else(|| BuildError::MissingAnnotations { key: key.clone() })?;
        let rows = parse_annotations(&bytes).map_err(|source| BuildError::Annotations {
            key: key.clone(),
            source,
        })?;
        let images = group_by_image(rows);
        let mut report = SplitReport::default();
        if images.is_empty() {
            warn!(split = %split, key, "No annotations found");
            return Ok(report);
        }
        info!(split = %split, images = images.len(), "Extracting features");
        self.sink
            .log(&format!("Found {} unique images in '{split}'", images.len()));

        let mut outputs = Vec::with_capacity(tasks.len());
        for &task in tasks {
            outputs.push(self.open_output(split, task, mode)?);
        }

        let total = images.len();
        for (idx, image) in images.iter().enumerate() {
            report.images_processed += 1;
            self.process_image(image, &mut outputs, &mut report);
            let done = idx + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                self.sink.progress(
                    percent(done, total),
                    &format!("Set {split}: {done}/{total}"),
                );
            }
        }

        for output in outputs {
            let key = output.copy_key.clone();
            let copy = output.writer.finish()?;
            copy.upload(self.store, self.visibility)?;
            debug!(key, "Feature file uploaded");
        }
        Ok(report)
    }

    fn open_output(
        &self,
        split: DatasetSplit,
        task: TaskType,
        mode: BuildMode,
    ) -> Result<TaskOutput, BuildError> {
        let key = feature_file_key(&self.layout.features_dir, split, task);
        let scratch_dir = self.scratch_dir.as_deref();
        let existing = match mode {
            BuildMode::Full => None,
            BuildMode::Incremental => self
                .store
                .get(&key)?
                .filter(|bytes| !bytes.iter().all(u8::is_ascii_whitespace)),
        };
        let Some(mut bytes) = existing else {
            let copy = ScratchCopy::empty_in(&key, scratch_dir)?;
            return Ok(TaskOutput {
                task,
                copy_key: key,
                existing: HashSet::new(),
                writer: FeatureWriter::new(copy, task, true)?,
            });
        };
        let keys = existing_keys(&key, &bytes, task)?;
        info!(key, existing = keys.len(), "Appending to existing feature file");
        if bytes.last() != Some(&b'\n') {
            bytes.push(b'\n');
        }
        let copy = ScratchCopy::with_contents(&key, &bytes, scratch_dir)?;
        Ok(TaskOutput {
            task,
            copy_key: key,
            existing: keys,
            writer: FeatureWriter::new(copy, task, false)?,
        })
    }

    fn process_image(
        &self,
        image: &ImageAnnotations,
        outputs: &mut [TaskOutput],
        report: &mut SplitReport,
    ) {
        let label = image_label(image);
        let key = image_key(&self.layout.dataset_dir, &image.image);
        let bytes = match self.store.get(&key) {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                warn!(image = %key, "Image not found, skipping");
                self.sink.log(&format!("Image not found: {key} (skipping)"));
                None
            }
            Err(err) => {
                warn!(image = %key, "Image unreadable, skipping: {err}");
                None
            }
        };

        for output in outputs.iter_mut() {
            let totals = report.totals_mut(output.task);
            let Some(bytes) = bytes.as_deref() else {
                totals.skipped += match output.task {
                    TaskType::Detector => 1,
                    TaskType::Classifier if label == Some(0) => image.rows.len(),
                    TaskType::Classifier => 0,
                };
                continue;
            };
            match output.task {
                TaskType::Detector => self.detector_row(image, label, bytes, output, totals),
                TaskType::Classifier if label == Some(0) => {
                    self.classifier_rows(image, bytes, output, totals)
                }
                TaskType::Classifier => {}
            }
        }
    }

    fn detector_row(
        &self,
        image: &ImageAnnotations,
        label: Option<usize>,
        bytes: &[u8],
        output: &mut TaskOutput,
        totals: &mut TaskTotals,
    ) {
        let Some(label) = label else {
            warn!(image = %image.image, "Ambiguous or unknown detection label, skipping");
            totals.skipped += 1;
            return;
        };
        let id = image.image.clone();
        if output.existing.contains(&id) {
            totals.skipped += 1;
            return;
        }
        let features = self.extractor.extract_image(bytes);
        output.write(id, TaskType::Detector.labels()[label], features, totals);
    }

    fn classifier_rows(
        &self,
        image: &ImageAnnotations,
        bytes: &[u8],
        output: &mut TaskOutput,
        totals: &mut TaskTotals,
    ) {
        let base = image.base_name();
        for (idx, row) in image.rows.iter().enumerate() {
            let ripeness = row
                .ripeness_class
                .as_deref()
                .and_then(|label| TaskType::Classifier.label_index(label));
            let (Some(ripeness), Some(bbox)) = (ripeness, row.bbox) else {
                debug!(image = %image.image, bbox = idx + 1, "Invalid bbox or ripeness label");
                totals.skipped += 1;
                continue;
            };
            let id = format!("{base}_bbox{}", idx + 1);
            if output.existing.contains(&id) {
                totals.skipped += 1;
                continue;
            }
            let features = self.extractor.extract_region(bytes, &bbox);
            output.write(id, TaskType::Classifier.labels()[ripeness], features, totals);
        }
    }
}

/// Image-level detection label index, `None` when unknown or inconsistent.
fn image_label(image: &ImageAnnotations) -> Option<usize> {
    let first = image.rows.first()?;
    if image
        .rows
        .iter()
        .any(|row| row.detection_class != first.detection_class)
    {
        return None;
    }
    TaskType::Detector.label_index(&first.detection_class)
}

struct TaskOutput {
    task: TaskType,
    copy_key: String,
    existing: HashSet<String>,
    writer: FeatureWriter<ScratchCopy>,
}

impl TaskOutput {
    fn write(
        &mut self,
        id: String,
        label: &str,
        features: Result<Vec<f32>, String>,
        totals: &mut TaskTotals,
    ) {
        let expected = self.task.feature_count();
        let features = match features {
            Ok(features) if features.len() == expected => features,
            Ok(features) => {
                warn!(id, got = features.len(), expected, "Feature count mismatch");
                totals.errors += 1;
                return;
            }
            Err(err) => {
                warn!(id, "Feature extraction failed: {err}");
                totals.errors += 1;
                return;
            }
        };
        let record = FeatureRecord {
            id: id.clone(),
            label: label.to_string(),
            features,
        };
        match self.writer.write(&record) {
            Ok(()) => {
                totals.written += 1;
                self.existing.insert(id);
            }
            Err(err) => {
                warn!(id, "Failed to write feature row: {err}");
                totals.errors += 1;
            }
        }
    }
}
