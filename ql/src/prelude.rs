use std::fmt::{Display, Formatter};

use anyhow::Result;

use crate::env::frame::{Frame, FrameShape};

/// Data type we use to encode an action to feed the model.
/// Actions are indices into [ArcadeEnvironment::action_meanings].
pub type ModelActionType = u8;

/// Meaning of a discrete action, as advertised by the simulator
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ActionMeaning {
    Noop,
    Fire,
    Up,
    Right,
    Left,
    Down,
    UpRight,
    UpLeft,
    DownRight,
    DownLeft,
}

impl Display for ActionMeaning {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        let s = match self {
            ActionMeaning::Noop => "NOOP",
            ActionMeaning::Fire => "FIRE",
            ActionMeaning::Up => "UP",
            ActionMeaning::Right => "RIGHT",
            ActionMeaning::Left => "LEFT",
            ActionMeaning::Down => "DOWN",
            ActionMeaning::UpRight => "UPRIGHT",
            ActionMeaning::UpLeft => "UPLEFT",
            ActionMeaning::DownRight => "DOWNRIGHT",
            ActionMeaning::DownLeft => "DOWNLEFT",
        };
        f.write_str(s)
    }
}

/// Side information of a step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepInfo {
    /// Episode was cut by a time limit rather than ended by the game
    pub truncated: bool,
    /// Life counter of the simulator after the step
    pub lives: u32,
}

/// Outcome of one time/action-step
#[derive(Clone, Debug)]
pub struct Step<O> {
    pub observation: O,
    /// immediate reward earned during performing that step
    pub reward: f32,
    /// done flag (e.g. game ended)
    pub done: bool,
    pub info: StepInfo,
}

impl<O> Step<O> {
    pub fn map_observation<T>(
        self,
        f: impl FnOnce(O) -> T,
    ) -> Step<T> {
        Step {
            observation: f(self.observation),
            reward: self.reward,
            done: self.done,
            info: self.info,
        }
    }
}

/// The arcade simulator, as seen by the frame pipeline.
///
/// Emits raw frames (usually RGB, `u8` pixels) and takes one discrete action per call of [Self::step].
pub trait ArcadeEnvironment {
    /// Resets the environment to a defined starting point and returns the first frame
    fn reset(&mut self) -> Result<Frame>;

    /// Performs one time/action-step.
    ///
    /// Applies the given `action` to the environment and returns:
    ///   - next frame
    ///   - immediate reward earned during performing that step
    ///   - done flag (game over)
    ///   - step info
    fn step(
        &mut self,
        action: ModelActionType,
    ) -> Result<Step<Frame>>;

    /// Meaning of every available action. Index = action.
    fn action_meanings(&self) -> &[ActionMeaning];

    /// Remaining lives
    fn lives(&self) -> u32;

    /// Shape of the frames emitted by [Self::reset] and [Self::step]
    fn frame_shape(&self) -> FrameShape;
}

#[derive(Debug)]
pub struct QlError(pub String);

impl QlError {
    pub fn from(msg: &str) -> Self { QlError(msg.to_string()) }
}

impl Display for QlError {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for QlError {}
