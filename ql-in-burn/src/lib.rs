pub mod burn_q_learning_model;
pub mod q_network;

/// Backend of the `train-arcade` binary and the tests: CPU ndarray with autodiff
pub type DefaultBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
