use anyhow::{anyhow, Result};
use burn::module::AutodiffModule;
use burn::nn::loss::{MseLoss, Reduction};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{GradientsParams, Optimizer, RmsProp, RmsPropConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ql::env::frame::FrameShape;
use ql::env::frame_stack::StackedFrames;
use ql::ml_model::model::{check_batch, DeepQLearningModel, ParameterSet};
use ql::prelude::{ModelActionType, QlError};

use crate::q_network::{QNetwork, QNetworkConfig};

/// [DeepQLearningModel] backed by a convolutional [QNetwork].
///
/// The online network lives on the autodiff backend and is trained with RMSProp.
/// The target network is a plain inner-backend copy, so it never takes part in gradient computation.
/// Online predictions run on an inner-backend snapshot that is refreshed after every update.
pub struct BurnQLearningModel<B: AutodiffBackend> {
    config: QNetworkConfig,
    device: B::Device,
    // Option only to move the network through the optimizer step
    online: Option<QNetwork<B>>,
    online_snapshot: QNetwork<B::InnerBackend>,
    target: QNetwork<B::InnerBackend>,
    optimizer: OptimizerAdaptor<RmsProp, QNetwork<B>, B>,
}

impl<B: AutodiffBackend> BurnQLearningModel<B> {
    pub fn new(
        config: QNetworkConfig,
        device: B::Device,
    ) -> Result<Self> {
        let online: QNetwork<B> = config.init(&device)?;
        let online_snapshot = online.valid();
        let target = online_snapshot.clone();
        let optimizer = RmsPropConfig::new()
            .with_alpha(config.decay)
            .init::<B, QNetwork<B>>();
        log::debug!(
            "q network for input {} and {} actions (learning rate {}, decay {})",
            config.input_shape,
            config.num_actions,
            config.learning_rate,
            config.decay
        );
        Ok(Self {
            config,
            device,
            online: Some(online),
            online_snapshot,
            target,
            optimizer,
        })
    }

    fn online(&self) -> Result<&QNetwork<B>> {
        self.online
            .as_ref()
            .ok_or_else(|| anyhow::Error::new(QlError::from("online network lost in a failed update")))
    }

    /// Stacks HWC observations into one NCHW input tensor
    fn input_tensor<BE: Backend>(
        &self,
        states: &[&StackedFrames],
        device: &BE::Device,
    ) -> Result<Tensor<BE, 4>> {
        let shape: FrameShape = self.config.input_shape;
        let len = shape.len();
        let mut values = vec![0.0_f32; states.len() * len];
        for (state, out) in states.iter().zip(values.chunks_exact_mut(len)) {
            let state_shape = state.shape();
            if state_shape.dims() != shape.dims() {
                Err(QlError(format!("model expects states of shape {}, got {}", shape, state_shape)))?
            }
            state.write_f32(out)?;
        }
        let data = TensorData::new(values, [states.len(), shape.height, shape.width, shape.channels]);
        Ok(Tensor::<BE, 4>::from_data(data, device).permute([0, 3, 1, 2]))
    }
}

fn to_rows<BE: Backend>(q_values: Tensor<BE, 2>) -> Result<Vec<Vec<f32>>> {
    let [_, num_actions] = q_values.dims();
    let values = q_values.into_data().to_vec::<f32>().map_err(|e| anyhow!("{e:?}"))?;
    Ok(values.chunks_exact(num_actions).map(|row| row.to_vec()).collect())
}

impl<B: AutodiffBackend> DeepQLearningModel for BurnQLearningModel<B> {
    fn num_actions(&self) -> usize { self.config.num_actions }

    fn predict(
        &self,
        parameter_set: ParameterSet,
        states: &[&StackedFrames],
    ) -> Result<Vec<Vec<f32>>> {
        if states.is_empty() {
            return Ok(vec![]);
        }
        let input = self.input_tensor::<B::InnerBackend>(states, &self.device)?;
        let q_values = match parameter_set {
            ParameterSet::Online => self.online_snapshot.forward(input),
            ParameterSet::Target => self.target.forward(input),
        };
        to_rows(q_values)
    }

    fn update(
        &mut self,
        states: &[&StackedFrames],
        actions: &[ModelActionType],
        targets: &[f32],
    ) -> Result<f32> {
        check_batch(states, actions, targets, self.num_actions())?;
        let input = self.input_tensor::<B>(states, &self.device)?;
        let action_indices: Vec<i32> = actions.iter().map(|&a| a as i32).collect();
        let action_indices = Tensor::<B, 1, Int>::from_ints(action_indices.as_slice(), &self.device).reshape([actions.len(), 1]);
        let targets = Tensor::<B, 1>::from_floats(targets, &self.device);

        let online = self
            .online
            .take()
            .ok_or_else(|| anyhow::Error::new(QlError::from("online network lost in a failed update")))?;
        let q_action: Tensor<B, 1> = online.forward(input).gather(1, action_indices).flatten(0, 1);
        let loss = MseLoss::new().forward(q_action, targets, Reduction::Mean);
        let loss_value = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), &online);
        let online = self.optimizer.step(self.config.learning_rate, online, grads);
        self.online_snapshot = online.valid();
        self.online = Some(online);

        if !loss_value.is_finite() {
            Err(QlError(format!("training diverged (loss = {})", loss_value)))?
        }
        Ok(loss_value)
    }

    fn copy_online_to_target(&mut self) -> Result<()> {
        self.online()?;
        self.target = self.online_snapshot.clone();
        Ok(())
    }
}
