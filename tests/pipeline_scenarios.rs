mod support;

use melonml::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use melonml::cache::InMemoryCache;
use melonml::config::{self, LayoutSettings, TrainingSettings};
use melonml::dataset::builder::{BuildMode, BuildReport, FeatureCorpusBuilder, TaskTotals};
use melonml::dataset::features::{feature_file_key, load_features};
use melonml::dataset::{DatasetSplit, LabeledDataset, TaskType};
use melonml::events::{EventStatus, RecordingSink};
use melonml::ml::balance::{rng_for, undersample};
use melonml::ml::cross_validation::cross_validate_with_folds;
use melonml::ml::gaussian_nb::GaussianNbOptions;
use melonml::ml::learning_curve::{LearningCurveOptions, learning_curve};
use melonml::ml::tree::TreeOptions;
use melonml::ml::{Estimator, ScaledModel};
use melonml::training::{ModelOutcome, RunOptions, Trainer};
use support::env::ConfigHomeGuard;
use support::synthetic::{SyntheticExtractor, detector_blobs, images, seed_split};

fn build(store: &dyn BlobStore, splits: &[DatasetSplit], mode: BuildMode) -> BuildReport {
    let sink = RecordingSink::new();
    FeatureCorpusBuilder::new(store, &SyntheticExtractor, &sink, LayoutSettings::default())
        .run(splits, &TaskType::ALL, mode)
        .unwrap()
}

fn small_catalog() -> Vec<Estimator> {
    vec![
        Estimator::GaussianNb(GaussianNbOptions::default()),
        Estimator::ClassificationTree(TreeOptions::default()),
    ]
}

fn trainer<'a>(store: &'a dyn BlobStore, cache: &'a InMemoryCache, sink: &'a RecordingSink) -> Trainer<'a> {
    Trainer::new(
        store,
        cache,
        sink,
        LayoutSettings::default(),
        TrainingSettings::default(),
    )
    .with_catalog(small_catalog())
}

#[test]
fn full_build_of_ten_images_writes_expected_rows() {
    let store = MemoryBlobStore::new();
    seed_split(&store, DatasetSplit::Train, &images(6, 4));
    let report = build(&store, &[DatasetSplit::Train], BuildMode::Full);

    let split = report.report(DatasetSplit::Train).unwrap();
    assert_eq!(split.images_processed, 10);
    assert_eq!(split.detector, TaskTotals { written: 10, skipped: 0, errors: 0 });
    assert_eq!(split.classifier, TaskTotals { written: 6, skipped: 0, errors: 0 });

    let detector = load_features(
        &store,
        &feature_file_key("dataset/features", DatasetSplit::Train, TaskType::Detector),
        TaskType::Detector,
    )
    .unwrap();
    assert_eq!(detector.dataset.class_counts(), vec![6, 4]);
    let classifier = load_features(
        &store,
        &feature_file_key("dataset/features", DatasetSplit::Train, TaskType::Classifier),
        TaskType::Classifier,
    )
    .unwrap();
    assert_eq!(classifier.dataset.len(), 6);
    assert_eq!(classifier.ids[0], "melon_0_bbox1");
}

#[test]
fn incremental_rebuild_on_disk_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::new(dir.path());
    seed_split(&store, DatasetSplit::Train, &images(4, 4));
    build(&store, &[DatasetSplit::Train], BuildMode::Full);
    let key = feature_file_key("dataset/features", DatasetSplit::Train, TaskType::Detector);
    let before = store.get(&key).unwrap().unwrap();

    let report = build(&store, &[DatasetSplit::Train], BuildMode::Incremental);
    assert_eq!(report.totals(TaskType::Detector).written, 0);
    assert_eq!(report.totals(TaskType::Classifier).written, 0);
    assert_eq!(store.get(&key).unwrap().unwrap(), before);
}

#[test]
fn broken_split_does_not_stop_the_others() {
    let store = MemoryBlobStore::new();
    seed_split(&store, DatasetSplit::Train, &images(3, 3));
    let report = build(
        &store,
        &[DatasetSplit::Train, DatasetSplit::Valid],
        BuildMode::Full,
    );
    assert!(report.any_succeeded());
    assert_eq!(report.failed_splits(), 1);
    assert!(report.report(DatasetSplit::Train).is_some());
}

#[test]
fn undersampling_six_to_forty_keeps_twelve() {
    let mut data = LabeledDataset::for_task(TaskType::Detector);
    for i in 0..6 {
        data.push(vec![i as f32; 8], 0);
    }
    for i in 0..40 {
        data.push(vec![-(i as f32); 8], 1);
    }
    let outcome = undersample(&data, 2.0, &mut rng_for(Some(7)));
    assert_eq!(outcome.dataset.class_counts(), vec![6, 12]);
    assert_eq!(outcome.dataset.len(), 18);
    assert_eq!(outcome.report.initial_distribution["non_melon"], 40);
}

#[test]
fn eight_samples_give_an_empty_learning_curve() {
    let data = detector_blobs(4, 0.0);
    let curve = learning_curve(
        &Estimator::GaussianNb(GaussianNbOptions::default()),
        &data,
        &LearningCurveOptions::default(),
        &mut rng_for(Some(3)),
    );
    assert!(curve.train_sizes.is_empty());
    assert!(curve.train_scores.is_empty());
    assert!(curve.test_scores.is_empty());
}

#[test]
fn missing_validation_store_still_persists_artifacts() {
    let store = MemoryBlobStore::new();
    seed_split(&store, DatasetSplit::Train, &images(8, 8));
    build(&store, &[DatasetSplit::Train], BuildMode::Full);

    let cache = InMemoryCache::new();
    let sink = RecordingSink::new();
    let trainer = trainer(&store, &cache, &sink);
    let report = trainer
        .train_task(TaskType::Detector, RunOptions::default())
        .unwrap();
    for outcome in &report.models {
        let ModelOutcome::Trained { model_key, validation, .. } = outcome else {
            panic!("{outcome:?}");
        };
        assert!(validation.is_none());
        assert!(store.exists(&format!("models/{model_key}.model")).unwrap());
        assert!(store.exists(&format!("models/{model_key}_scaler.json")).unwrap());
        assert!(store.exists(&format!("models/{model_key}_meta.json")).unwrap());
    }

    let estimator = Estimator::GaussianNb(GaussianNbOptions::default());
    let model = trainer
        .model_store()
        .load_model(&estimator.model_key(TaskType::Detector))
        .unwrap()
        .unwrap();
    let validation = trainer.validate(TaskType::Detector, &estimator, &model, &mut rng_for(Some(1)));
    assert!(validation.is_none());
}

#[test]
fn end_to_end_training_versions_and_evaluates() {
    let store = MemoryBlobStore::new();
    seed_split(&store, DatasetSplit::Train, &images(12, 30));
    seed_split(&store, DatasetSplit::Valid, &images(6, 6));
    seed_split(&store, DatasetSplit::Test, &images(5, 5));
    let built = build(&store, &DatasetSplit::ALL, BuildMode::Full);
    assert_eq!(built.failed_splits(), 0);

    let cache = InMemoryCache::new();
    let sink = RecordingSink::new();
    let trainer = trainer(&store, &cache, &sink);
    let options = RunOptions {
        with_cv: true,
        with_test: true,
    };
    let first = trainer.run(&TaskType::ALL, options);
    assert!(first.any_succeeded());
    let second = trainer.run(&[TaskType::Detector], options);

    let models = trainer.model_store();
    for estimator in small_catalog() {
        let key = estimator.model_key(TaskType::Detector);
        let meta = models.load_metadata(&key).unwrap().unwrap();
        assert_eq!(meta.version, 2);
        for version in [1, 2] {
            assert!(store.exists(&models.metadata_history_key(&key, version)).unwrap());
        }
    }

    let detector = second.report(TaskType::Detector).unwrap();
    assert!(detector.balance.applied);
    assert_eq!(detector.balance.final_distribution["non_melon"], 24);
    for outcome in &detector.models {
        let ModelOutcome::Trained {
            validation,
            cross_validation,
            ..
        } = outcome
        else {
            panic!("{outcome:?}");
        };
        let bundle = validation.as_ref().unwrap();
        assert_eq!(bundle.validation_samples_count, 12);
        let metrics = &bundle.metrics;
        let cells: u32 = metrics.confusion_matrix.iter().flatten().sum();
        assert_eq!(cells as usize, metrics.samples);
        for class in metrics.classes.values() {
            for value in [class.precision, class.recall, class.f1_score] {
                assert!((0.0..=1.0).contains(&value));
            }
        }
        let cv = cross_validation.as_ref().unwrap();
        assert_eq!(cv.metrics_per_fold.accuracy.len(), 5);
    }
    let tests = detector.test_results.as_ref().unwrap();
    assert_eq!(tests.len(), 2);
    assert!(tests.values().all(|report| report.samples == 10));

    let classifier = first.report(TaskType::Classifier).unwrap();
    assert!(!classifier.balance.applied);
    assert_eq!(classifier.trained(), 2);

    let aggregate = models.load_all_metrics(TaskType::Detector).unwrap().unwrap();
    assert_eq!(aggregate.len(), 2);
    assert!(
        sink.statuses()
            .iter()
            .all(|status| *status != EventStatus::Error)
    );
}

#[test]
fn swapping_scalers_changes_predictions() {
    let estimator = Estimator::GaussianNb(GaussianNbOptions::default());
    let near = detector_blobs(10, 0.0);
    let far = detector_blobs(10, 10.0);
    let a = estimator.fit_scaled(&near).unwrap();
    let b = estimator.fit_scaled(&far).unwrap();

    let own = a.predict(&near).unwrap();
    let (model, _) = a.clone().into_parts();
    let swapped = ScaledModel::new(model, b.scaler().clone()).unwrap();
    assert_ne!(swapped.predict(&near).unwrap(), own);
}

#[test]
fn degenerate_fold_is_left_out_of_the_aggregate() {
    let mut data = LabeledDataset::for_task(TaskType::Detector);
    for i in 0..5 {
        data.push(vec![4.0 + i as f32 * 0.1; 8], 0);
    }
    for i in 0..15 {
        data.push(vec![-4.0 - i as f32 * 0.1; 8], 1);
    }
    let folds: Vec<Vec<usize>> = (0..4).map(|f| (f * 5..f * 5 + 5).collect()).collect();
    let result = cross_validate_with_folds(
        &Estimator::GaussianNb(GaussianNbOptions::default()),
        &data,
        &folds,
    );
    assert_eq!(result.metrics_per_fold.accuracy[0], None);
    let accuracy = result.summary["accuracy"];
    assert_eq!(accuracy.folds, 3);
    let retained: Vec<f64> = result.metrics_per_fold.accuracy.iter().flatten().copied().collect();
    let mean = retained.iter().sum::<f64>() / retained.len() as f64;
    assert!((accuracy.mean - mean).abs() < 1e-12);
}

#[test]
fn config_is_read_from_the_application_directory() {
    let home = tempfile::tempdir().unwrap();
    let _guard = ConfigHomeGuard::set(home.path().to_path_buf());
    let path = config::config_path().unwrap();
    std::fs::write(&path, "[training]\nk_folds = 3\nseed = 7\n").unwrap();
    let loaded = config::load_or_default(None).unwrap();
    assert_eq!(loaded.training.k_folds, 3);
    assert_eq!(loaded.training.seed, Some(7));
    assert_eq!(loaded.layout, LayoutSettings::default());
}
