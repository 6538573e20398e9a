use std::{collections::BTreeSet, sync::Arc};

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::{
        backend::{AutodiffBackend, Backend},
        Int, Tensor, TensorData,
    },
};

use crate::{loss::one_hot, Error, Result};

/// A normalized image stored row-major as `[height, width, channels]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    shape: [usize; 3],
    pixels: Vec<f32>,
}

impl Image {
    pub fn new(shape: [usize; 3], pixels: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product();
        if pixels.len() != expected {
            return Err(Error::PixelCount {
                shape,
                expected,
                found: pixels.len(),
            });
        }
        Ok(Self { shape, pixels })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }
}

/// An image with its integer class label.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageItem {
    pub image: Image,
    pub label: usize,
}

/// In-memory split of labeled images.
#[derive(Clone, Debug, Default)]
pub struct ImageDataset {
    items: Vec<ImageItem>,
}

impl ImageDataset {
    pub fn new(items: Vec<ImageItem>) -> Self {
        Self { items }
    }

    /// Pairs images with labels, which must have the same length.
    pub fn from_parts(images: Vec<Image>, labels: Vec<usize>) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(Error::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }
        let items = images
            .into_iter()
            .zip(labels)
            .map(|(image, label)| ImageItem { image, label })
            .collect();
        Ok(Self { items })
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    /// Number of distinct label values.
    pub fn num_classes(&self) -> usize {
        self.items
            .iter()
            .map(|item| item.label)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Shape of the first image, if any.
    pub fn image_shape(&self) -> Option<[usize; 3]> {
        self.items.first().map(|item| item.image.shape())
    }

    /// Fails on the first label outside `[0, num_classes)`.
    pub fn check_labels(&self, num_classes: usize) -> Result<()> {
        match self.items.iter().find(|item| item.label >= num_classes) {
            Some(item) => Err(Error::LabelOutOfRange {
                label: item.label,
                num_classes,
            }),
            None => Ok(()),
        }
    }

    /// Fails on the first image whose shape differs from `shape`.
    pub fn check_shapes(&self, shape: [usize; 3]) -> Result<()> {
        match self.items.iter().find(|item| item.image.shape() != shape) {
            Some(item) => Err(Error::ShapeMismatch {
                expected: shape,
                found: item.image.shape(),
            }),
            None => Ok(()),
        }
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Tensors for one mini-batch.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch_size, height, width, channels]`
    pub images: Tensor<B, 4>,
    /// `[batch_size, num_classes]`
    pub one_hot: Tensor<B, 2>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: AutodiffBackend> ImageBatch<B> {
    /// The same batch on the inner backend, detached from the autodiff graph.
    pub fn inner(self) -> ImageBatch<B::InnerBackend> {
        ImageBatch {
            images: self.images.inner(),
            one_hot: self.one_hot.inner(),
            targets: self.targets.inner(),
        }
    }
}

/// Builds batch tensors on a device for a fixed image shape and class count.
#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    shape: [usize; 3],
    num_classes: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, shape: [usize; 3], num_classes: usize) -> Self {
        Self {
            device,
            shape,
            num_classes,
        }
    }

    /// Stacks unlabeled images into `[n, height, width, channels]`, rejecting any image
    /// of another shape.
    pub fn images(&self, images: &[Image]) -> Result<Tensor<B, 4>> {
        if let Some(image) = images.iter().find(|image| image.shape() != self.shape) {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                found: image.shape(),
            });
        }
        Ok(self.stack(images.iter()))
    }

    fn stack<'a>(&self, images: impl ExactSizeIterator<Item = &'a Image>) -> Tensor<B, 4> {
        let [height, width, channels] = self.shape;
        let count = images.len();
        let pixels = images
            .flat_map(|image| image.pixels().iter().copied())
            .collect::<Vec<_>>();

        let data = TensorData::new(pixels, [count, height, width, channels])
            .convert::<B::FloatElem>();
        Tensor::from_data(data, &self.device)
    }
}

/// Items must already have the batcher's shape and labels below its class count. The
/// classifier checks both for every split when it is built.
impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let images = self.stack(items.iter().map(|item| &item.image));
        let labels = items.iter().map(|item| item.label).collect::<Vec<_>>();
        let one_hot = one_hot(&labels, self.num_classes, &self.device);
        let targets = labels.iter().map(|label| *label as i64).collect::<Vec<_>>();
        let targets = Tensor::from_data(
            TensorData::new(targets, [labels.len()]).convert::<B::IntElem>(),
            &self.device,
        );

        ImageBatch {
            images,
            one_hot,
            targets,
        }
    }
}

/// Loader yielding a fresh permutation of `dataset` every epoch, in batches of
/// `batch_size` with a smaller last batch when the split does not divide evenly.
pub fn shuffled_loader<B: Backend>(
    batcher: ImageBatcher<B>,
    dataset: Arc<ImageDataset>,
    batch_size: usize,
    seed: u64,
) -> Arc<dyn DataLoader<ImageBatch<B>>> {
    DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .shuffle(seed)
        .build(dataset)
}

/// Loader over `dataset` in order, in chunks of `chunk_size` or as one batch.
pub fn sequential_loader<B: Backend>(
    batcher: ImageBatcher<B>,
    dataset: Arc<ImageDataset>,
    chunk_size: Option<usize>,
) -> Arc<dyn DataLoader<ImageBatch<B>>> {
    let batch_size = chunk_size.unwrap_or(dataset.len()).max(1);

    DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .build(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn item(shape: [usize; 3], value: f32, label: usize) -> ImageItem {
        let pixels = vec![value; shape.iter().product()];
        ImageItem {
            image: Image::new(shape, pixels).unwrap(),
            label,
        }
    }

    /// One item per label, so batch targets identify dataset positions.
    fn indexed(len: usize) -> (ImageBatcher<TestBackend>, Arc<ImageDataset>) {
        let items = (0..len).map(|label| item([1, 1, 1], 0.0, label)).collect();
        let batcher = ImageBatcher::new(Default::default(), [1, 1, 1], len);
        (batcher, Arc::new(ImageDataset::new(items)))
    }

    fn epoch(loader: &Arc<dyn DataLoader<ImageBatch<TestBackend>>>) -> Vec<Vec<i64>> {
        loader
            .iter()
            .map(|batch| batch.targets.into_data().iter::<i64>().collect())
            .collect()
    }

    #[test]
    fn shuffled_epoch_covers_every_item_once_with_partial_tail() {
        let (batcher, dataset) = indexed(10);
        let loader = shuffled_loader(batcher, dataset, 4, 1);

        let batches = epoch(&loader);

        let sizes = batches.iter().map(Vec::len).collect::<Vec<_>>();
        let mut seen = batches.concat();
        seen.sort_unstable();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn each_epoch_draws_a_new_permutation() {
        let (batcher, dataset) = indexed(32);
        let loader = shuffled_loader(batcher, dataset, 32, 1);

        let first = epoch(&loader).concat();
        let second = epoch(&loader).concat();

        assert_ne!(first, second);
    }

    #[test]
    fn sequential_loader_keeps_dataset_order() {
        let (batcher, dataset) = indexed(5);

        let chunked = epoch(&sequential_loader(batcher.clone(), dataset.clone(), Some(2)));
        let whole = epoch(&sequential_loader(batcher, dataset, None));

        assert_eq!(chunked, vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(whole, vec![vec![0, 1, 2, 3, 4]]);
    }

    #[test]
    fn batch_builds_channels_last_tensors() {
        let batcher = ImageBatcher::<TestBackend>::new(Default::default(), [2, 2, 3], 4);
        let items = vec![item([2, 2, 3], 0.5, 3), item([2, 2, 3], -1.0, 1)];

        let batch = batcher.batch(items);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.images.dims(), [2, 2, 2, 3]);
        assert_eq!(batch.one_hot.dims(), [2, 4]);
        assert_eq!(
            batch.targets.into_data().iter::<i64>().collect::<Vec<_>>(),
            vec![3, 1]
        );
    }

    #[test]
    fn images_rejects_foreign_shape() {
        let batcher = ImageBatcher::<TestBackend>::new(Default::default(), [32, 32, 3], 2);
        let images = [item([32, 32, 3], 0.0, 0).image, item([28, 28, 3], 0.0, 1).image];

        let result = batcher.images(&images);

        assert_eq!(
            result.err(),
            Some(Error::ShapeMismatch {
                expected: [32, 32, 3],
                found: [28, 28, 3]
            })
        );
    }

    #[test]
    fn dataset_reports_first_foreign_shape() {
        let dataset = ImageDataset::new(vec![
            item([32, 32, 3], 0.0, 0),
            item([32, 32, 1], 0.0, 1),
        ]);

        assert_eq!(
            dataset.check_shapes([32, 32, 3]),
            Err(Error::ShapeMismatch {
                expected: [32, 32, 3],
                found: [32, 32, 1]
            })
        );
        assert_eq!(dataset.image_shape(), Some([32, 32, 3]));
    }

    #[test]
    fn pixel_count_must_match_shape() {
        let result = Image::new([2, 2, 3], vec![0.0; 11]);

        assert!(matches!(result, Err(Error::PixelCount { expected: 12, found: 11, .. })));
    }

    #[test]
    fn dataset_counts_distinct_labels_and_checks_range() {
        let images = (0..4)
            .map(|_| Image::new([1, 1, 1], vec![0.0]).unwrap())
            .collect::<Vec<_>>();
        let dataset = ImageDataset::from_parts(images, vec![0, 2, 2, 5]).unwrap();

        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.get(1).map(|item| item.label), Some(2));
        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(
            dataset.check_labels(3),
            Err(Error::LabelOutOfRange {
                label: 5,
                num_classes: 3
            })
        );
        assert!(dataset.check_labels(6).is_ok());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let images = vec![Image::new([1, 1, 1], vec![0.0]).unwrap()];

        let result = ImageDataset::from_parts(images, vec![0, 1]);

        assert!(matches!(
            result,
            Err(Error::LengthMismatch {
                images: 1,
                labels: 2
            })
        ));
    }
}
