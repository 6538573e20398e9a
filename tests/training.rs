use burn::{
    backend::{Autodiff, NdArray},
    module::AutodiffModule,
    tensor::{Tensor, TensorData},
};
use lenet::{
    loss::predictions, AdamConfig, Classifier, Error, Image, ImageDataset, ImageItem, Splits,
    StopReason, TrainingConfig,
};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<TestBackend>;

fn image(shape: [usize; 3], label: usize, variant: usize) -> Image {
    let count = shape.iter().product::<usize>();
    let sign = if label == 0 { -1.0 } else { 1.0 };
    let pixels = (0..count)
        .map(|index| sign * 0.5 + ((index * 7 + variant * 13) % 11) as f32 * 0.01)
        .collect();
    Image::new(shape, pixels).unwrap()
}

fn split(count: usize, shape: [usize; 3]) -> ImageDataset {
    let items = (0..count)
        .map(|index| ImageItem {
            image: image(shape, index % 2, index),
            label: index % 2,
        })
        .collect();
    ImageDataset::new(items)
}

fn splits(shape: [usize; 3]) -> Splits {
    Splits {
        train: split(12, shape),
        valid: split(4, shape),
        test: split(4, shape),
    }
}

fn config() -> TrainingConfig {
    TrainingConfig::new(AdamConfig::new())
        .with_batch_size(5)
        .with_seed(3)
}

fn classifier(splits: Splits, config: TrainingConfig) -> lenet::Result<Classifier<TestAutodiffBackend>> {
    Classifier::new(splits, config, Default::default())
}

#[test]
fn short_run_records_every_epoch_and_predicts_known_classes() {
    let mut classifier = classifier(splits([32, 32, 3]), config()).unwrap();

    let report = classifier.train(3).unwrap();

    assert_eq!(report.stop_reason, StopReason::Exhausted);
    assert_eq!(report.history.len(), 3);
    assert_eq!(
        report
            .history
            .records()
            .iter()
            .map(|record| record.epoch)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    let columns = report.history.columns();
    assert_eq!(columns.train_loss.len(), 3);
    assert_eq!(columns.valid_accuracy.len(), 3);
    assert!(columns
        .train_accuracy
        .iter()
        .chain(&columns.valid_accuracy)
        .all(|accuracy| (0.0..=1.0).contains(accuracy)));
    assert!(report.history.non_finite_epochs().is_empty());
    assert!((0.0..=1.0).contains(&report.test.accuracy));

    let images = (0..6)
        .map(|index| image([32, 32, 3], index % 2, 100 + index))
        .collect::<Vec<_>>();
    let predicted = classifier.predict(&images).unwrap();

    assert_eq!(predicted.len(), 6);
    assert!(predicted.iter().all(|class| *class < 2));
}

#[test]
fn chunked_evaluation_matches_single_pass() {
    let mut whole = classifier(splits([32, 32, 3]), config()).unwrap();
    let mut chunked =
        classifier(splits([32, 32, 3]), config().with_eval_batch_size(Some(3))).unwrap();

    let whole = whole.train(2).unwrap();
    let chunked = chunked.train(2).unwrap();

    assert!((whole.test.loss - chunked.test.loss).abs() < 1e-5);
    assert_eq!(whole.test.accuracy, chunked.test.accuracy);
}

fn stacked(images: &[Image]) -> Tensor<TestBackend, 4> {
    let pixels = images
        .iter()
        .flat_map(|image| image.pixels().iter().copied())
        .collect::<Vec<_>>();
    let [height, width, channels] = images[0].shape();
    Tensor::from_data(
        TensorData::new(pixels, [images.len(), height, width, channels]),
        &Default::default(),
    )
}

#[test]
fn predictions_and_test_metrics_use_the_final_parameters() {
    let splits = splits([32, 32, 3]);
    let test = splits.test.clone();
    let mut classifier = classifier(splits, config().with_eval_batch_size(Some(3))).unwrap();

    let report = classifier.train(6).unwrap();

    let images = test
        .items()
        .iter()
        .map(|item| item.image.clone())
        .collect::<Vec<_>>();
    let logits = classifier.model().valid().forward(stacked(&images));
    let expected = predictions(logits.clone());

    assert_eq!(classifier.predict(&images).unwrap(), expected);
    assert_eq!(classifier.evaluate(&test).unwrap(), report.test);
    assert_eq!(classifier.evaluate(&test).unwrap(), report.test);

    let after = classifier.model().valid().forward(stacked(&images));
    assert_eq!(
        after.into_data().to_vec::<f32>().unwrap(),
        logits.into_data().to_vec::<f32>().unwrap()
    );
}

#[test]
fn each_call_to_train_starts_from_fresh_parameters() {
    let mut classifier = classifier(splits([32, 32, 3]), config()).unwrap();

    let first = classifier.train(2).unwrap();
    let second = classifier.train(2).unwrap();

    assert_eq!(first.history, second.history);
    assert_eq!(first.test, second.test);
}

#[test]
fn foreign_image_shape_is_rejected_before_training() {
    let mut splits = splits([32, 32, 3]);
    let mut items = splits.train.items().to_vec();
    items.push(ImageItem {
        image: image([28, 28, 3], 1, 0),
        label: 1,
    });
    splits.train = ImageDataset::new(items);

    let result = classifier(splits, config());

    assert_eq!(
        result.err(),
        Some(Error::ShapeMismatch {
            expected: [32, 32, 3],
            found: [28, 28, 3]
        })
    );
}

#[test]
fn predict_rejects_foreign_image_shape() {
    let classifier = classifier(splits([32, 32, 3]), config()).unwrap();

    let result = classifier.predict(&[image([32, 32, 1], 0, 0)]);

    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}

#[test]
fn mnist_sized_images_do_not_fit_the_network() {
    let result = classifier(splits([28, 28, 3]), config());

    assert!(matches!(
        result.err(),
        Some(Error::FeatureMismatch {
            layer: "fc1",
            expected: 400,
            ..
        })
    ));
}

#[test]
fn single_channel_images_do_not_fit_the_network() {
    let result = classifier(splits([32, 32, 1]), config());

    assert!(matches!(
        result.err(),
        Some(Error::ChannelMismatch { found: 1, .. })
    ));
}
