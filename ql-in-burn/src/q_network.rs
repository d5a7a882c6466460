use anyhow::Result;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use ql::env::frame::FrameShape;
use ql::prelude::QlError;

/// (kernel, stride, output channels) of the convolution layers
const CONV_LAYERS: [(usize, usize, usize); 3] = [(8, 4, 32), (4, 2, 64), (3, 1, 64)];
const HIDDEN_UNITS: usize = 512;

/// Hyperparameters of a [QNetwork] and its optimizer
#[derive(Clone, Debug)]
pub struct QNetworkConfig {
    /// shape of one stacked observation (height, width, stacked channels)
    pub input_shape: FrameShape,
    pub num_actions: usize,
    pub learning_rate: f64,
    /// RMSProp decay rate of the squared gradient average
    pub decay: f32,
}

impl QNetworkConfig {
    pub fn new(
        input_shape: FrameShape,
        num_actions: usize,
    ) -> Self {
        Self {
            input_shape,
            num_actions,
            learning_rate: 1e-4,
            decay: 0.99,
        }
    }

    /// Height and width of the feature map after the last convolution
    fn conv_output_dims(&self) -> Result<(usize, usize)> {
        let mut dims = (self.input_shape.height, self.input_shape.width);
        for (kernel, stride, _) in CONV_LAYERS {
            if dims.0 < kernel || dims.1 < kernel {
                Err(QlError(format!(
                    "input {} too small for the convolution layers",
                    self.input_shape
                )))?
            }
            dims = ((dims.0 - kernel) / stride + 1, (dims.1 - kernel) / stride + 1);
        }
        Ok(dims)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_actions == 0 {
            Err(QlError::from("num_actions must be positive"))?
        }
        if self.input_shape.channels == 0 {
            Err(QlError::from("input must have at least one channel"))?
        }
        if !(self.learning_rate > 0.0) {
            Err(QlError(format!("learning rate must be positive, got {}", self.learning_rate)))?
        }
        if !(0.0..1.0).contains(&self.decay) {
            Err(QlError(format!("decay must be within [0, 1), got {}", self.decay)))?
        }
        self.conv_output_dims()?;
        Ok(())
    }

    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<QNetwork<B>> {
        self.validate()?;
        let (height, width) = self.conv_output_dims()?;
        let conv = |in_channels: usize, (kernel, stride, out_channels): (usize, usize, usize)| -> Conv2d<B> {
            Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
                .with_stride([stride, stride])
                .init(device)
        };
        let [c1, c2, c3] = CONV_LAYERS;
        Ok(QNetwork {
            conv1: conv(self.input_shape.channels, c1),
            conv2: conv(c1.2, c2),
            conv3: conv(c2.2, c3),
            dense1: LinearConfig::new(height * width * c3.2, HIDDEN_UNITS).init(device),
            dense2: LinearConfig::new(HIDDEN_UNITS, self.num_actions).init(device),
        })
    }
}

/// Action-value network: three convolutions, followed by two dense layers with one output per action.
#[derive(Module, Debug)]
pub struct QNetwork<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    dense1: Linear<B>,
    dense2: Linear<B>,
}

impl<B: Backend> QNetwork<B> {
    /// `[batch, channels, height, width]` -> `[batch, num_actions]`
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = relu(self.conv1.forward(x));
        let x = relu(self.conv2.forward(x));
        let x = relu(self.conv3.forward(x));
        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = relu(self.dense1.forward(x));
        self.dense2.forward(x)
    }
}
