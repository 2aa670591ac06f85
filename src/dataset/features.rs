//! Feature Record Store: one CSV per split and task.
//!
//! Layout is `[id, label, f1..fN]` with headers `filename,label,df1..df8`
//! (detector) and `annotation_id,label,cf1..cf38` (classifier).

use std::collections::HashSet;
use std::io::Write;

use thiserror::Error;
use tracing::{debug, warn};

use super::labeled::{DatasetSplit, LabeledDataset, TaskType};
use crate::blob::{BlobError, BlobStore, join_key};

#[derive(Debug, Error)]
pub enum FeatureStoreError {
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("Failed to parse feature file {key}: {source}")]
    Csv { key: String, source: csv::Error },
    #[error("Unexpected header in {key}: expected {expected}, found {found}")]
    Header {
        key: String,
        expected: String,
        found: String,
    },
}

/// Blob key of the feature file for `split` and `task`.
pub fn feature_file_key(features_dir: &str, split: DatasetSplit, task: TaskType) -> String {
    join_key(features_dir, &format!("{split}_{task}_features.csv"))
}

/// Header row for a task's feature file.
pub fn header(task: TaskType) -> Vec<String> {
    let mut header = vec![task.id_column().to_string(), "label".to_string()];
    header.extend((1..=task.feature_count()).map(|idx| format!("{}{idx}", task.column_prefix())));
    header
}

/// One stored training example.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: String,
    pub label: String,
    pub features: Vec<f32>,
}

/// Streaming writer for feature rows.
pub struct FeatureWriter<W: Write> {
    inner: csv::Writer<W>,
    task: TaskType,
}

impl<W: Write> FeatureWriter<W> {
    /// Wrap `out`; the header is written only when `write_header` is set
    /// (appending to an existing file skips it).
    pub fn new(out: W, task: TaskType, write_header: bool) -> Result<Self, csv::Error> {
        let mut inner = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        if write_header {
            inner.write_record(header(task))?;
        }
        Ok(Self { inner, task })
    }

    pub fn write(&mut self, record: &FeatureRecord) -> Result<(), csv::Error> {
        debug_assert_eq!(record.features.len(), self.task.feature_count());
        let mut row = Vec::with_capacity(record.features.len() + 2);
        row.push(record.id.clone());
        row.push(record.label.clone());
        row.extend(record.features.iter().map(|value| value.to_string()));
        self.inner.write_record(&row)
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(self) -> Result<W, csv::Error> {
        self.inner.into_inner().map_err(|err| err.into_error().into())
    }
}

/// Valid records of a feature file plus the number of rejected rows.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeatures {
    pub records: Vec<FeatureRecord>,
    pub rejected_rows: usize,
}

/// Parse a feature file, validating the header.
///
/// Blank content yields no records. Rows with a wrong field count, an empty
/// id, an unknown label or a non-numeric value are rejected and counted.
pub fn parse_feature_file(
    key: &str,
    bytes: &[u8],
    task: TaskType,
) -> Result<ParsedFeatures, FeatureStoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(ParsedFeatures::default());
    }
    let csv_err = |source| FeatureStoreError::Csv {
        key: key.to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let found = reader.headers().map_err(csv_err)?.clone();
    check_header(key, &found, task)?;

    let mut parsed = ParsedFeatures::default();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        match parse_row(&record, task) {
            Some(row) => parsed.records.push(row),
            None => {
                parsed.rejected_rows += 1;
                warn!(key, row = ?record.get(0), "Skipping invalid feature row");
            }
        }
    }
    Ok(parsed)
}

fn check_header(key: &str, found: &csv::StringRecord, task: TaskType) -> Result<(), FeatureStoreError> {
    let expected = header(task);
    let matches = found.len() == expected.len()
        && found.get(0).map(|s| s.eq_ignore_ascii_case(task.id_column())) == Some(true)
        && found.get(1).map(|s| s.eq_ignore_ascii_case("label")) == Some(true);
    if matches {
        return Ok(());
    }
    Err(FeatureStoreError::Header {
        key: key.to_string(),
        expected: format!("{},{},...({} features)", expected[0], expected[1], task.feature_count()),
        found: found.iter().collect::<Vec<_>>().join(","),
    })
}

fn parse_row(record: &csv::StringRecord, task: TaskType) -> Option<FeatureRecord> {
    if record.len() != task.feature_count() + 2 {
        return None;
    }
    let id = normalize_id(record.get(0)?, task);
    if id.is_empty() {
        return None;
    }
    let label = record.get(1)?.to_ascii_lowercase();
    task.label_index(&label)?;
    let features = record
        .iter()
        .skip(2)
        .map(|value| value.parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f32>>>()?;
    Some(FeatureRecord { id, label, features })
}

fn normalize_id(raw: &str, task: TaskType) -> String {
    let id = raw.trim();
    match task {
        TaskType::Detector => id.replace('\\', "/"),
        TaskType::Classifier => id.to_string(),
    }
}

/// Identifiers already present in a feature file, for incremental builds.
///
/// Every record with a non-empty id counts, even when its label or values
/// would be rejected by [`parse_feature_file`].
pub fn existing_keys(
    key: &str,
    bytes: &[u8],
    task: TaskType,
) -> Result<HashSet<String>, FeatureStoreError> {
    let mut keys = HashSet::new();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(keys);
    }
    let csv_err = |source| FeatureStoreError::Csv {
        key: key.to_string(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let found = reader.headers().map_err(csv_err)?.clone();
    check_header(key, &found, task)?;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let id = record.get(0).map(|raw| normalize_id(raw, task)).unwrap_or_default();
        if !id.is_empty() {
            keys.insert(id);
        }
    }
    Ok(keys)
}

/// A feature file loaded for training or evaluation.
#[derive(Debug, Clone)]
pub struct LoadedFeatures {
    pub dataset: LabeledDataset,
    pub ids: Vec<String>,
    /// blake3 hex digest of the raw file; `None` when the file is absent.
    pub digest: Option<String>,
}

/// Load a feature file into a [`LabeledDataset`]; a missing file yields an empty set.
pub fn load_features(
    store: &dyn BlobStore,
    key: &str,
    task: TaskType,
) -> Result<LoadedFeatures, FeatureStoreError> {
    let mut dataset = LabeledDataset::for_task(task);
    let mut ids = Vec::new();
    let Some(bytes) = store.get(key)? else {
        warn!(key, "Feature file not found");
        return Ok(LoadedFeatures {
            dataset,
            ids,
            digest: None,
        });
    };
    let digest = blake3::hash(&bytes).to_hex().to_string();
    let parsed = parse_feature_file(key, &bytes, task)?;
    for record in parsed.records {
        if let Some(label) = task.label_index(&record.label) {
            dataset.push(record.features, label);
            ids.push(record.id);
        }
    }
    debug!(key, samples = dataset.len(), rejected = parsed.rejected_rows, "Loaded features");
    Ok(LoadedFeatures {
        dataset,
        ids,
        digest: Some(digest),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryBlobStore, Visibility};

    fn detector_row(id: &str, label: &str, value: f32) -> FeatureRecord {
        FeatureRecord {
            id: id.to_string(),
            label: label.to_string(),
            features: vec![value; 8],
        }
    }

    #[test]
    fn header_layout_per_task() {
        let det = header(TaskType::Detector);
        assert_eq!(det[0], "filename");
        assert_eq!(det[2], "df1");
        assert_eq!(det.len(), 10);
        let cls = header(TaskType::Classifier);
        assert_eq!(cls[0], "annotation_id");
        assert_eq!(cls.last().map(String::as_str), Some("cf38"));
    }

    #[test]
    fn writer_output_parses_back_and_rejects_bad_rows() {
        let mut writer = FeatureWriter::new(Vec::new(), TaskType::Detector, true).unwrap();
        writer.write(&detector_row("a.jpg", "melon", 0.5)).unwrap();
        writer.write(&detector_row("b.jpg", "non_melon", 1.25)).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.extend_from_slice(b"c.jpg,banana,1,1,1,1,1,1,1,1\nd.jpg,melon,1,2\n");

        let parsed = parse_feature_file("k", &bytes, TaskType::Detector).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.rejected_rows, 2);
        assert_eq!(parsed.records[1].features[0], 1.25);
    }

    #[test]
    fn wrong_header_is_an_error() {
        let bytes = b"annotation_id,label,cf1\nx,ripe,1\n";
        let err = parse_feature_file("k", bytes, TaskType::Detector).unwrap_err();
        assert!(matches!(err, FeatureStoreError::Header { .. }));
    }

    #[test]
    fn existing_keys_normalise_backslashes() {
        let bytes = b"filename,label,df1,df2,df3,df4,df5,df6,df7,df8\nimg\\a.jpg,melon,1,1,1,1,1,1,1,1\n";
        let keys = existing_keys("k", bytes, TaskType::Detector).unwrap();
        assert!(keys.contains("img/a.jpg"));
    }

    #[test]
    fn existing_keys_include_rows_that_fail_to_parse() {
        let bytes = b"filename,label,df1,df2,df3,df4,df5,df6,df7,df8\n\
            a.jpg,non_melon,1,1,1,1,1,1,1,NaN\n\
            b.jpg,banana,1,1,1,1,1,1,1,1\n\
            c.jpg,melon,1,1\n\
            ,melon,1,1,1,1,1,1,1,1\n";
        let keys = existing_keys("k", bytes, TaskType::Detector).unwrap();
        let mut keys: Vec<_> = keys.into_iter().collect();
        keys.sort();
        assert_eq!(keys, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(parse_feature_file("k", bytes, TaskType::Detector).unwrap().records.len(), 0);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let store = MemoryBlobStore::new();
        let loaded = load_features(&store, "dataset/features/valid_detector_features.csv", TaskType::Detector)
            .unwrap();
        assert!(loaded.dataset.is_empty());
        assert!(loaded.digest.is_none());

        let mut writer = FeatureWriter::new(Vec::new(), TaskType::Detector, true).unwrap();
        writer.write(&detector_row("a.jpg", "non_melon", 2.0)).unwrap();
        let bytes = writer.finish().unwrap();
        store.put("f.csv", &bytes, Visibility::Private).unwrap();
        let loaded = load_features(&store, "f.csv", TaskType::Detector).unwrap();
        assert_eq!(loaded.dataset.y, vec![1]);
        assert_eq!(loaded.ids, vec!["a.jpg".to_string()]);
        assert_eq!(loaded.digest.map(|d| d.len()), Some(64));
    }
}
