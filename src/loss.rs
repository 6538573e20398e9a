use burn::tensor::{
    activation::log_softmax, backend::Backend, ElementConversion, Int, Tensor, TensorData,
};

/// One-hot encodes labels into `[labels.len(), num_classes]`.
///
/// Every label must be below `num_classes`.
pub fn one_hot<B: Backend>(labels: &[usize], num_classes: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; labels.len() * num_classes];
    for (row, label) in labels.iter().enumerate() {
        values[row * num_classes + label] = 1.0;
    }
    let data = TensorData::new(values, [labels.len(), num_classes]).convert::<B::FloatElem>();
    Tensor::from_data(data, device)
}

/// Mean softmax cross-entropy of `logits` against one-hot `targets`.
///
/// # Shapes
///
/// - logits: `[batch_size, num_classes]`
/// - targets: `[batch_size, num_classes]`
/// - output: `[1]`
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let per_example = (log_softmax(logits, 1) * targets).sum_dim(1).neg();
    per_example.mean()
}

/// Class index with the highest logit for every row.
pub fn predictions<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    let [batch_size, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([batch_size])
        .into_data()
        .iter::<i64>()
        .map(|class| class as usize)
        .collect()
}

/// Fraction of rows whose arg max equals the target class.
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let [batch_size, _] = logits.dims();
    if batch_size == 0 {
        return 0.0;
    }
    let correct = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<f64>();

    correct / batch_size as f64
}
