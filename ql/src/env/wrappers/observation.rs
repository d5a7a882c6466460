use anyhow::Result;

use crate::env::frame::{Frame, FrameShape, PixelKind};
use crate::env::frame_transform::{scale_to_unit, FrameTransform};
use crate::env::stage::{Layer, Stage, StageKind};
use crate::prelude::{ModelActionType, QlError, Step};

/// Applies the [FrameTransform] to every frame
pub struct Warp {
    transform: FrameTransform,
}

impl Warp {
    pub fn new(
        transform: FrameTransform,
        input: FrameShape,
    ) -> Result<Self> {
        transform.check_input(input)?;
        Ok(Self { transform })
    }
}

impl Stage for Warp {
    fn kind(&self) -> StageKind { StageKind::Warp }

    fn frame_shape(
        &self,
        inner: FrameShape,
    ) -> FrameShape {
        self.transform.output_shape(inner)
    }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        self.transform.transform(&inner.reset()?)
    }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let step = inner.step(action)?;
        let observation = self.transform.transform(&step.observation)?;
        Ok(Step { observation, ..step })
    }
}

/// Converts u8 pixels to f32 in [0,1].
///
/// Careful: this multiplies the memory footprint of every frame by four.
pub struct ScaledFloat;

impl ScaledFloat {
    pub fn new(input: FrameShape) -> Result<Self> {
        if input.kind != PixelKind::U8 {
            Err(QlError(format!("scaling requires u8 frames, got {}", input)))?
        }
        Ok(Self)
    }
}

impl Stage for ScaledFloat {
    fn kind(&self) -> StageKind { StageKind::ScaledFloat }

    fn frame_shape(
        &self,
        inner: FrameShape,
    ) -> FrameShape {
        FrameShape { kind: PixelKind::F32, ..inner }
    }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        scale_to_unit(&inner.reset()?)
    }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let step = inner.step(action)?;
        let observation = scale_to_unit(&step.observation)?;
        Ok(Step { observation, ..step })
    }
}

/// Bins the reward to {+1, 0, -1} by its sign
pub fn clip_reward(reward: f32) -> f32 {
    if reward > 0.0 {
        1.0
    } else if reward < 0.0 {
        -1.0
    } else {
        // keeps 0.0 and NaN as they are
        reward
    }
}

pub struct ClipReward;

impl Stage for ClipReward {
    fn kind(&self) -> StageKind { StageKind::ClipReward }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let step = inner.step(action)?;
        Ok(Step {
            reward: clip_reward(step.reward),
            ..step
        })
    }
}
