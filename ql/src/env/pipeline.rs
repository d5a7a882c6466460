use std::rc::Rc;

use anyhow::Result;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::env::frame::FrameShape;
use crate::env::frame_stack::{FrameStack, StackedFrames};
use crate::env::frame_transform::FrameTransform;
use crate::env::stage::{Chain, Layer, Stage, StageKind};
use crate::env::wrappers::{ClipReward, EpisodicLife, FireReset, MaxAndSkip, NoopReset, ScaledFloat, TimeLimit, Warp};
use crate::prelude::{ActionMeaning, ArcadeEnvironment, ModelActionType, QlError, Step};

/// Which stages the pipeline is built from, and how they are parameterized
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// upper bound of random no-ops on reset
    pub noop_max: usize,
    /// raw steps per agent step
    pub skip: usize,
    pub max_episode_steps: Option<usize>,
    /// end episodes on life loss
    pub episode_life: bool,
    pub clip_rewards: bool,
    pub frame_width: usize,
    pub frame_height: usize,
    pub grayscale: bool,
    /// f32 pixels in [0,1] instead of u8
    pub scale: bool,
    /// number of stacked frames; `None` behaves like a stack of one
    pub frame_stack: Option<usize>,
    /// seed for the no-op randomization
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            noop_max: 30,
            skip: 4,
            max_episode_steps: None,
            episode_life: true,
            clip_rewards: true,
            frame_width: 84,
            frame_height: 84,
            grayscale: true,
            scale: false,
            frame_stack: Some(4),
            seed: None,
        }
    }
}

impl PipelineConfig {
    /// Pipeline the agent learns on: clipped rewards, scaled and stacked frames
    pub fn training() -> Self {
        Self {
            scale: true,
            ..Self::default()
        }
    }

    /// Same as [Self::training], but reporting the unclipped game score
    pub fn evaluation() -> Self {
        Self {
            clip_rewards: false,
            ..Self::training()
        }
    }
}

/// The raw arcade environment composed with its episode control stages and a frame stack.
///
/// Stage order (innermost first) is fixed: no-op reset, max-and-skip, time limit, episodic life, fire reset,
/// warp, scale, reward clip. Optional stages are left out according to [PipelineConfig].
pub struct EnvironmentPipeline {
    raw: Box<dyn ArcadeEnvironment>,
    stages: Vec<Box<dyn Stage>>,
    frame_stack: FrameStack,
}

impl EnvironmentPipeline {
    pub fn new(
        raw: Box<dyn ArcadeEnvironment>,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let action_meanings = raw.action_meanings().to_vec();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(NoopReset::new(&action_meanings, config.noop_max, rng)?),
            Box::new(MaxAndSkip::new(config.skip)?),
        ];
        if let Some(max_episode_steps) = config.max_episode_steps {
            stages.push(Box::new(TimeLimit::new(max_episode_steps)?));
        }
        if config.episode_life {
            stages.push(Box::new(EpisodicLife::new()));
        }
        if action_meanings.contains(&ActionMeaning::Fire) {
            stages.push(Box::new(FireReset::new(&action_meanings)?));
        }

        let transform = FrameTransform {
            height: config.frame_height,
            width: config.frame_width,
            grayscale: config.grayscale,
        };
        let shape = stages.iter().fold(raw.frame_shape(), |shape, stage| stage.frame_shape(shape));
        let warp = Warp::new(transform, shape)?;
        let shape = warp.frame_shape(shape);
        stages.push(Box::new(warp));

        if config.scale {
            stages.push(Box::new(ScaledFloat::new(shape)?));
        }
        if config.clip_rewards {
            stages.push(Box::new(ClipReward));
        }

        let frame_stack = FrameStack::new(config.frame_stack.unwrap_or(1))?;

        log::debug!(
            "environment pipeline: {} | frame stack {}",
            stages.iter().map(|s| s.kind()).join(" -> "),
            frame_stack.k()
        );

        Ok(Self { raw, stages, frame_stack })
    }

    fn chain(&mut self) -> Chain<'_, 'static> {
        Chain {
            raw: self.raw.as_mut(),
            stages: &mut self.stages,
        }
    }

    pub fn reset(&mut self) -> Result<Rc<StackedFrames>> {
        let frame = self.chain().reset()?;
        Ok(self.frame_stack.reset(frame))
    }

    pub fn step(
        &mut self,
        action: ModelActionType,
    ) -> Result<Step<Rc<StackedFrames>>> {
        if action as usize >= self.num_actions() {
            Err(QlError(format!("action {} out of range 0..{}", action, self.num_actions())))?
        }
        let step = self.chain().step(action)?;
        let observation = self.frame_stack.push(step.observation)?;
        Ok(Step {
            observation,
            reward: step.reward,
            done: step.done,
            info: step.info,
        })
    }

    pub fn num_actions(&self) -> usize { self.raw.action_meanings().len() }

    pub fn action_meanings(&self) -> &[ActionMeaning] { self.raw.action_meanings() }

    /// Shape of a single processed frame
    pub fn frame_shape(&self) -> FrameShape {
        self.stages.iter().fold(self.raw.frame_shape(), |shape, stage| stage.frame_shape(shape))
    }

    /// Shape of the stacked observation
    pub fn observation_shape(&self) -> FrameShape {
        let frame = self.frame_shape();
        FrameShape {
            channels: frame.channels * self.frame_stack.k(),
            ..frame
        }
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> { self.stages.iter().map(|s| s.kind()).collect() }
}
