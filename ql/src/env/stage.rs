use std::fmt::{Display, Formatter};

use anyhow::Result;

use crate::env::frame::{Frame, FrameShape};
use crate::prelude::{ActionMeaning, ArcadeEnvironment, ModelActionType, Step};

/// Capability tag of a pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    NoopReset,
    MaxAndSkip,
    TimeLimit,
    EpisodicLife,
    FireReset,
    Warp,
    ScaledFloat,
    ClipReward,
}

impl Display for StageKind {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Everything below a stage: the raw environment wrapped by all inner stages.
pub trait Layer {
    fn reset(&mut self) -> Result<Frame>;

    fn step(
        &mut self,
        action: ModelActionType,
    ) -> Result<Step<Frame>>;

    fn lives(&self) -> u32;

    fn action_meanings(&self) -> &[ActionMeaning];

    fn frame_shape(&self) -> FrameShape;
}

/// One step of the environment pipeline.
///
/// A stage reshapes reset/step semantics of the layer below it. The default implementations pass everything through
/// unchanged, so a stage only overrides what it actually alters.
pub trait Stage {
    fn kind(&self) -> StageKind;

    /// Shape of the frames this stage emits, given the shape of the frames it receives
    fn frame_shape(
        &self,
        inner: FrameShape,
    ) -> FrameShape {
        inner
    }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        inner.reset()
    }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        inner.step(action)
    }
}

/// Raw environment plus an ordered list of stages (innermost first), viewed as one [Layer].
pub(crate) struct Chain<'a, 'e> {
    pub raw: &'a mut (dyn ArcadeEnvironment + 'e),
    pub stages: &'a mut [Box<dyn Stage>],
}

impl Layer for Chain<'_, '_> {
    fn reset(&mut self) -> Result<Frame> {
        match self.stages.split_last_mut() {
            None => self.raw.reset(),
            Some((outer, inner_stages)) => outer.reset(&mut Chain {
                raw: &mut *self.raw,
                stages: inner_stages,
            }),
        }
    }

    fn step(
        &mut self,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        match self.stages.split_last_mut() {
            None => self.raw.step(action),
            Some((outer, inner_stages)) => outer.step(
                &mut Chain {
                    raw: &mut *self.raw,
                    stages: inner_stages,
                },
                action,
            ),
        }
    }

    fn lives(&self) -> u32 { self.raw.lives() }

    fn action_meanings(&self) -> &[ActionMeaning] { self.raw.action_meanings() }

    fn frame_shape(&self) -> FrameShape {
        self.stages.iter().fold(self.raw.frame_shape(), |shape, stage| stage.frame_shape(shape))
    }
}
