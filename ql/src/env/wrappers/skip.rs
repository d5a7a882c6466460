use anyhow::Result;

use crate::env::frame::Frame;
use crate::env::stage::{Layer, Stage, StageKind};
use crate::prelude::{ModelActionType, QlError, Step};

/// Repeats an action for `skip` raw steps, sums up the rewards and max-pools the last two raw frames.
pub struct MaxAndSkip {
    skip: usize,
}

impl MaxAndSkip {
    pub fn new(skip: usize) -> Result<Self> {
        if skip == 0 {
            Err(QlError::from("skip must be at least 1"))?
        }
        Ok(Self { skip })
    }
}

impl Stage for MaxAndSkip {
    fn kind(&self) -> StageKind { StageKind::MaxAndSkip }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let mut total_reward = 0.0;
        let mut previous: Option<Frame> = None;
        let mut last: Option<Step<Frame>> = None;

        for _ in 0..self.skip {
            let step = inner.step(action)?;
            total_reward += step.reward;
            let done = step.done;
            if let Some(replaced) = last.replace(step) {
                previous = Some(replaced.observation);
            }
            if done {
                break;
            }
        }

        let last = match last {
            Some(last) => last,
            None => Err(QlError::from("max-and-skip took no raw step"))?,
        };
        let observation = match previous {
            Some(previous) => previous.max(&last.observation)?,
            None => last.observation,
        };
        Ok(Step {
            observation,
            reward: total_reward,
            done: last.done,
            info: last.info,
        })
    }
}
