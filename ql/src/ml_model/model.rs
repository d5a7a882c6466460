use anyhow::Result;

use crate::env::frame_stack::StackedFrames;
use crate::prelude::{ModelActionType, QlError};

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// The two independently addressable parameter sets of a model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterSet {
    /// trained by gradient descent
    Online,
    /// frozen copy of `Online`, used for stable bootstrap targets
    Target,
}

/// 'Physical' AI model abstraction: an action-value function approximator
pub trait DeepQLearningModel {
    /// Number of actions = length of every predicted action-value vector
    fn num_actions(&self) -> usize;

    /// Predicts one action-value vector per state, using the given parameter set.
    fn predict(
        &self,
        parameter_set: ParameterSet,
        states: &[&StackedFrames],
    ) -> Result<Vec<Vec<f32>>>;

    /// Performs a single training step on the `Online` parameters using a batch of data,
    /// minimizing the squared error between the value of the chosen action and the target.
    ///
    /// # Arguments
    /// * `states` batch of states
    /// * `actions` action taken in each state
    /// * `targets` bootstrapped q-value targets
    ///
    /// # Returns
    ///   calculated loss
    fn update(
        &mut self,
        states: &[&StackedFrames],
        actions: &[ModelActionType],
        targets: &[f32],
    ) -> Result<f32>;

    /// Overwrites the `Target` parameters with the `Online` parameters
    fn copy_online_to_target(&mut self) -> Result<()>;

    /// Predicts the best action for the current state (online parameters).
    /// Ties resolve to the lowest action.
    fn predict_action(
        &self,
        state: &StackedFrames,
    ) -> Result<ModelActionType> {
        let q_values = self.predict(ParameterSet::Online, &[state])?;
        match q_values.first().and_then(|q| argmax(q)) {
            Some(action) => Ok(action as ModelActionType),
            None => Err(QlError::from("model predicted no action values"))?,
        }
    }

    /// Maximum predicted action-value per state, using the target parameters
    fn batch_predict_max_future_reward(
        &self,
        states: &[&StackedFrames],
    ) -> Result<Vec<f32>> {
        self.predict(ParameterSet::Target, states)?
            .iter()
            .map(|q| {
                q.iter()
                    .copied()
                    .reduce(f32::max)
                    .ok_or_else(|| anyhow::Error::new(QlError::from("model predicted no action values")))
            })
            .collect()
    }
}

/// Index of the first maximum
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Checks the shapes of a training batch
pub fn check_batch(
    states: &[&StackedFrames],
    actions: &[ModelActionType],
    targets: &[f32],
    num_actions: usize,
) -> Result<()> {
    if states.is_empty() || states.len() != actions.len() || states.len() != targets.len() {
        Err(QlError(format!(
            "inconsistent batch: {} states, {} actions, {} targets",
            states.len(),
            actions.len(),
            targets.len()
        )))?
    }
    if let Some(a) = actions.iter().find(|&&a| a as usize >= num_actions) {
        Err(QlError(format!("action {} out of range 0..{}", a, num_actions)))?
    }
    if let Some(t) = targets.iter().find(|t| !t.is_finite()) {
        Err(QlError(format!("non-finite q-value target: {}", t)))?
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(& [1.0, 3.0, 2.0], Some(1))]
    #[case(& [5.0, 5.0, 1.0], Some(0))]
    #[case(& [-1.0, -0.5, -0.5], Some(1))]
    #[case(& [], None)]
    fn test_argmax(
        #[case] values: &[f32],
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(argmax(values), expected);
    }
}
