use anyhow::Result;
use rand::rngs::StdRng;
use rand::Rng;

use crate::env::frame::Frame;
use crate::env::stage::{Layer, Stage, StageKind};
use crate::prelude::{ActionMeaning, ModelActionType, QlError, Step};

const NOOP_ACTION: ModelActionType = 0;
const FIRE_ACTION: ModelActionType = 1;
const FOLLOW_UP_ACTION: ModelActionType = 2;

/// Samples initial states by taking a random number of no-ops in `[1, noop_max]` on reset.
pub struct NoopReset {
    noop_max: usize,
    rng: StdRng,
}

impl NoopReset {
    pub fn new(
        action_meanings: &[ActionMeaning],
        noop_max: usize,
        rng: StdRng,
    ) -> Result<Self> {
        if action_meanings.first() != Some(&ActionMeaning::Noop) {
            Err(QlError::from("no-op reset requires action 0 to mean NOOP"))?
        }
        if noop_max == 0 {
            Err(QlError::from("noop_max must be at least 1"))?
        }
        Ok(Self { noop_max, rng })
    }
}

impl Stage for NoopReset {
    fn kind(&self) -> StageKind { StageKind::NoopReset }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        let mut frame = inner.reset()?;
        let noops = self.rng.gen_range(1..=self.noop_max);
        for _ in 0..noops {
            let step = inner.step(NOOP_ACTION)?;
            frame = match step.done {
                true => inner.reset()?,
                false => step.observation,
            };
        }
        Ok(frame)
    }
}

/// Presses FIRE on reset, for games that stand still until fired.
pub struct FireReset;

impl FireReset {
    pub fn new(action_meanings: &[ActionMeaning]) -> Result<Self> {
        if action_meanings.get(FIRE_ACTION as usize) != Some(&ActionMeaning::Fire) {
            Err(QlError::from("fire reset requires action 1 to mean FIRE"))?
        }
        if action_meanings.len() < 3 {
            Err(QlError::from("fire reset requires at least 3 actions"))?
        }
        Ok(Self)
    }
}

impl Stage for FireReset {
    fn kind(&self) -> StageKind { StageKind::FireReset }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        inner.reset()?;
        if inner.step(FIRE_ACTION)?.done {
            inner.reset()?;
        }
        let step = inner.step(FOLLOW_UP_ACTION)?;
        match step.done {
            true => inner.reset(),
            false => Ok(step.observation),
        }
    }
}

/// Forces `done` (flagged as truncated) after `max_episode_steps` steps since the last reset.
pub struct TimeLimit {
    max_episode_steps: usize,
    elapsed_steps: usize,
}

impl TimeLimit {
    pub fn new(max_episode_steps: usize) -> Result<Self> {
        if max_episode_steps == 0 {
            Err(QlError::from("max_episode_steps must be at least 1"))?
        }
        Ok(Self {
            max_episode_steps,
            elapsed_steps: 0,
        })
    }
}

impl Stage for TimeLimit {
    fn kind(&self) -> StageKind { StageKind::TimeLimit }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        self.elapsed_steps = 0;
        inner.reset()
    }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let mut step = inner.step(action)?;
        self.elapsed_steps += 1;
        if self.elapsed_steps >= self.max_episode_steps {
            step.done = true;
            step.info.truncated = true;
        }
        Ok(step)
    }
}

/// Makes end-of-life the end of an episode, but only resets the game on true game over.
///
/// All states stay reachable this way, even though lives are episodic.
pub struct EpisodicLife {
    lives: u32,
    was_real_done: bool,
}

impl EpisodicLife {
    pub fn new() -> Self {
        Self {
            lives: 0,
            was_real_done: true,
        }
    }

    /// Whether the last `done` was a game over (and not just a lost life)
    pub fn was_real_done(&self) -> bool { self.was_real_done }
}

impl Default for EpisodicLife {
    fn default() -> Self { Self::new() }
}

impl Stage for EpisodicLife {
    fn kind(&self) -> StageKind { StageKind::EpisodicLife }

    fn reset(
        &mut self,
        inner: &mut dyn Layer,
    ) -> Result<Frame> {
        let frame = match self.was_real_done {
            true => inner.reset()?,
            // no-op step to advance from the lost-life state
            false => inner.step(NOOP_ACTION)?.observation,
        };
        self.lives = inner.lives();
        Ok(frame)
    }

    fn step(
        &mut self,
        inner: &mut dyn Layer,
        action: ModelActionType,
    ) -> Result<Step<Frame>> {
        let mut step = inner.step(action)?;
        self.was_real_done = step.done;
        let lives = inner.lives();
        // lives == 0 may show up a few frames before the game advertises done; we only want to reset once
        if lives < self.lives && lives > 0 {
            step.done = true;
        }
        self.lives = lives;
        Ok(step)
    }
}
