use std::rc::Rc;

use anyhow::{ensure, Result};
use itertools::Itertools;
use num_format::ToFormattedString;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::env::frame_stack::StackedFrames;
use crate::env::pipeline::EnvironmentPipeline;
use crate::learn::replay_buffer::{ReplayBuffer, Transition};
use crate::ml_model::model::DeepQLearningModel;
use crate::prelude::{ModelActionType, QlError};
use crate::util::format;
use crate::util::immutable::Immutable;

#[derive(Clone, Debug)]
pub struct Parameter {
    /// Global step budget; training stops when the step counter reaches it
    pub total_steps: usize,
    /// Maximum replay length
    pub history_buffer_len: usize,
    /// Number of steps to only collect experience before learning starts
    pub warmup_steps: usize,
    /// Train the model after n actions
    pub update_after_actions: usize,
    /// After how many steps we want to update the target network
    pub update_target_network_after_num_steps: usize,
    /// Size of batch taken from replay buffer
    pub batch_size: usize,
    /// Discount rate; (0 <= 𝛾 <= 1) represents the value of future rewards. The bigger, the more farsighted the agent becomes
    pub gamma: f32,
    /// Maximum epsilon greedy parameter
    pub epsilon_max: f64,
    /// Minimum epsilon greedy parameter
    pub epsilon_min: f64,
    /// Number of steps over which epsilon decays from max to min
    pub epsilon_greedy_steps: usize,
    pub eval_after_steps: usize,
    pub eval_plays: usize,
    pub eval_episodes_per_play: usize,
    /// Epsilon of the near-greedy evaluation policy
    pub eval_epsilon: f64,
    pub loss_report_after_steps: usize,
    pub episode_report_after_episodes: usize,
    pub seed: Option<u64>,
}

impl Parameter {
    fn epsilon_interval(&self) -> f64 { self.epsilon_max - self.epsilon_min }

    /// Exploration rate at the given step: linear decay from `epsilon_max` to `epsilon_min`, held afterwards
    pub fn epsilon(
        &self,
        step: usize,
    ) -> f64 {
        let progress = step as f64 / self.epsilon_greedy_steps as f64;
        f64::max(self.epsilon_min, self.epsilon_max - self.epsilon_interval() * progress)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(
            self.history_buffer_len >= self.batch_size,
            "history_buffer_len ({}) must hold at least one batch ({})",
            self.history_buffer_len,
            self.batch_size
        );
        ensure!(
            self.warmup_steps >= self.batch_size,
            "warmup_steps ({}) must be at least batch_size ({})",
            self.warmup_steps,
            self.batch_size
        );
        for (name, value) in [
            ("update_after_actions", self.update_after_actions),
            ("update_target_network_after_num_steps", self.update_target_network_after_num_steps),
            ("epsilon_greedy_steps", self.epsilon_greedy_steps),
            ("eval_after_steps", self.eval_after_steps),
            ("eval_plays", self.eval_plays),
            ("eval_episodes_per_play", self.eval_episodes_per_play),
            ("loss_report_after_steps", self.loss_report_after_steps),
            ("episode_report_after_episodes", self.episode_report_after_episodes),
        ] {
            ensure!(value > 0, "{} must be positive", name);
        }
        ensure!((0.0..=1.0).contains(&self.gamma), "gamma must be within [0, 1], got {}", self.gamma);
        ensure!(
            0.0 <= self.epsilon_min && self.epsilon_min <= self.epsilon_max && self.epsilon_max <= 1.0,
            "expected 0 <= epsilon_min <= epsilon_max <= 1, got {} and {}",
            self.epsilon_min,
            self.epsilon_max
        );
        ensure!(
            (0.0..=1.0).contains(&self.eval_epsilon),
            "eval_epsilon must be within [0, 1], got {}",
            self.eval_epsilon
        );
        Ok(())
    }
}

impl Default for Parameter {
    fn default() -> Self {
        Self {
            total_steps: 2_000_000,
            history_buffer_len: 10_000,
            warmup_steps: 10_000,
            update_after_actions: 4,
            update_target_network_after_num_steps: 10_000,
            batch_size: 32,
            gamma: 0.99,
            epsilon_max: 1.0,
            epsilon_min: 0.1,
            epsilon_greedy_steps: 1_000_000,
            eval_after_steps: 100_000,
            eval_plays: 30,
            eval_episodes_per_play: 5,
            eval_epsilon: 0.001,
            loss_report_after_steps: 10_000,
            episode_report_after_episodes: 200,
            seed: None,
        }
    }
}

/// What the learner observed so far
#[derive(Clone, Debug, Default)]
pub struct TrainingHistory {
    /// total (training pipeline) reward of every completed episode
    pub episode_rewards: Vec<f32>,
    /// (step, mean reward) of every evaluation
    pub eval_rewards: Vec<(usize, f32)>,
    /// loss of every learning step
    pub losses: Vec<f32>,
}

/// Q value = reward + discount factor * expected future reward.
/// For terminal steps, the updated q-value is exactly the reward.
pub fn bootstrap_targets(
    rewards: &[f32],
    dones: &[bool],
    max_future_rewards: &[f32],
    gamma: f32,
) -> Vec<f32> {
    rewards
        .iter()
        .zip(dones)
        .zip(max_future_rewards)
        .map(|((&reward, &done), &max_future_reward)| match done {
            true => reward,
            false => reward + gamma * max_future_reward,
        })
        .collect()
}

/// A self-driving Q learning algorithm.
///
/// It's directly connected to a (training) environment pipeline and drives the speed of the steps in that environment
/// with its response. A second, independent pipeline is used for evaluation only.
///
/// Every [Self::step] runs one cycle of
/// `act -> observe -> (learn) -> (sync target) -> (evaluate) -> (reset)`.
pub struct SelfDrivingQLearner<M: DeepQLearningModel> {
    param: Immutable<Parameter>,
    environment: EnvironmentPipeline,
    eval_environment: EnvironmentPipeline,
    model: M,
    replay_buffer: ReplayBuffer<Rc<StackedFrames>>,
    rng: StdRng,
    eval_rng: StdRng,
    state: Option<Rc<StackedFrames>>,
    step_count: usize,
    episode_count: usize,
    episode_reward: f32,
    history: TrainingHistory,
    /// losses since the last loss report
    recent_losses: Vec<f32>,
}

impl<M: DeepQLearningModel> SelfDrivingQLearner<M> {
    pub fn new(
        environment: EnvironmentPipeline,
        eval_environment: EnvironmentPipeline,
        model: M,
        param: Parameter,
    ) -> Result<Self> {
        param.validate()?;
        if model.num_actions() != environment.num_actions() || eval_environment.num_actions() != environment.num_actions() {
            Err(QlError(format!(
                "number of actions differs: model {}, training environment {}, evaluation environment {}",
                model.num_actions(),
                environment.num_actions(),
                eval_environment.num_actions()
            )))?
        }
        if environment.observation_shape() != eval_environment.observation_shape() {
            Err(QlError(format!(
                "observation shapes differ: training {}, evaluation {}",
                environment.observation_shape(),
                eval_environment.observation_shape()
            )))?
        }

        let mut rng = match param.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let eval_rng = StdRng::from_rng(&mut rng)?;

        Ok(Self {
            replay_buffer: ReplayBuffer::new(param.history_buffer_len),
            param: Immutable::new(param),
            environment,
            eval_environment,
            model,
            rng,
            eval_rng,
            state: None,
            step_count: 0,
            episode_count: 0,
            episode_reward: 0.0,
            history: TrainingHistory::default(),
            recent_losses: vec![],
        })
    }

    /// Runs until the global step budget is spent
    pub fn learn(&mut self) -> Result<()> {
        log::info!(
            "learning for {} steps ({} actions, observation {})",
            self.param.total_steps.to_formatted_string(&format::number_format()),
            self.environment.num_actions(),
            self.environment.observation_shape()
        );
        while self.step_count < self.param.total_steps {
            self.step()?;
        }
        log::info!("finished after {} episodes", self.episode_count.to_formatted_string(&format::number_format()));
        Ok(())
    }

    /// One action-step in the training environment, followed by the periodic learning tasks.
    ///
    /// Returns whether the step ended an episode.
    pub fn step(&mut self) -> Result<bool> {
        let state = match &self.state {
            Some(state) => Rc::clone(state),
            None => self.environment.reset()?,
        };

        // Use epsilon-greedy for exploration
        let epsilon = self.param.epsilon(self.step_count);
        let action = epsilon_greedy_action(&mut self.rng, &self.model, &state, epsilon)?;

        // Apply the sampled action in our environment
        let step = self.environment.step(action)?;
        log::trace!("step with action {} resulted in reward: {:.2}, done: {}", action, step.reward, step.done);

        self.step_count += 1;
        self.episode_reward += step.reward;

        // Save actions and states in replay buffer
        self.replay_buffer.push(Transition {
            state,
            action,
            state_next: Rc::clone(&step.observation),
            reward: step.reward,
            done: step.done,
        });

        if self.step_count > self.param.warmup_steps {
            if self.step_count % self.param.update_after_actions == 0 {
                let loss = self.learn_from_replay()?;
                self.history.losses.push(loss);
                self.recent_losses.push(loss);
            }

            if self.step_count % self.param.update_target_network_after_num_steps == 0 {
                // update the target network with new weights
                self.model.copy_online_to_target()?;
                log::debug!("target network synchronized at step {}", self.step_count);
            }

            if self.step_count % self.param.eval_after_steps == 0 {
                let mean_reward = self.evaluate()?;
                self.history.eval_rewards.push((self.step_count, mean_reward));
                log::info!(
                    "evaluation at step {}: mean reward {:.2}",
                    self.step_count.to_formatted_string(&format::number_format()),
                    mean_reward
                );
            }
        }

        if self.step_count % self.param.loss_report_after_steps == 0 && !self.recent_losses.is_empty() {
            self.loss_report_log();
        }

        if step.done {
            self.history.episode_rewards.push(self.episode_reward);
            self.episode_count += 1;
            if self.episode_count % self.param.episode_report_after_episodes == 0 {
                log::info!(
                    "episode {}, steps {}: episode reward {:.1}",
                    self.episode_count.to_formatted_string(&format::number_format()),
                    self.step_count.to_formatted_string(&format::number_format()),
                    self.episode_reward
                );
            }
            self.episode_reward = 0.0;
            self.state = Some(self.environment.reset()?);
        } else {
            self.state = Some(step.observation);
        }

        Ok(step.done)
    }

    /// A single training step on a batch sampled from the replay buffer
    fn learn_from_replay(&mut self) -> Result<f32> {
        let samples = self.replay_buffer.sample(&mut self.rng, self.param.batch_size)?;

        let states: Vec<&StackedFrames> = samples.iter().map(|t| t.state.as_ref()).collect();
        let states_next: Vec<&StackedFrames> = samples.iter().map(|t| t.state_next.as_ref()).collect();
        let actions: Vec<ModelActionType> = samples.iter().map(|t| t.action).collect();
        let rewards: Vec<f32> = samples.iter().map(|t| t.reward).collect();
        let dones: Vec<bool> = samples.iter().map(|t| t.done).collect();

        // Use the target model for stability
        let max_future_rewards = self.model.batch_predict_max_future_reward(&states_next)?;
        let targets = bootstrap_targets(&rewards, &dones, &max_future_rewards, self.param.gamma);

        self.model.update(&states, &actions, &targets)
    }

    /// Plays `eval_plays` x `eval_episodes_per_play` episodes with a near-greedy policy in the evaluation
    /// environment and returns the mean total reward of a play.
    ///
    /// Leaves the replay buffer, the model and the training environment untouched.
    pub fn evaluate(&mut self) -> Result<f32> {
        let mut total_reward = 0.0;
        for _ in 0..self.param.eval_plays {
            for _ in 0..self.param.eval_episodes_per_play {
                let mut state = self.eval_environment.reset()?;
                loop {
                    let action = epsilon_greedy_action(&mut self.eval_rng, &self.model, &state, self.param.eval_epsilon)?;
                    let step = self.eval_environment.step(action)?;
                    total_reward += step.reward;
                    if step.done {
                        break;
                    }
                    state = step.observation;
                }
            }
        }
        Ok(total_reward / self.param.eval_plays as f32)
    }

    fn loss_report_log(&mut self) {
        let number_format = format::number_format();

        let mut action_counts = FxHashMap::<ModelActionType, usize>::default();
        for a in self.replay_buffer.actions() {
            action_counts.entry(a).and_modify(|e| *e += 1).or_insert(1);
        }

        let total_actions = self.replay_buffer.len();
        let action_meanings = self.environment.action_meanings();
        let action_distribution_line = action_counts
            .iter()
            .sorted_by_key(|&(&action, _)| action)
            .map(|(&action, &count)| {
                let ratio = 100.0 * count as f32 / total_actions as f32;
                format!("{} {:.1}%", action_meanings[action as usize], ratio)
            })
            .join(", ");

        let mean_loss = self.recent_losses.iter().sum::<f32>() / self.recent_losses.len() as f32;
        self.recent_losses.clear();

        log::info!(
            "\n\
    episode: {}, steps: {}, 𝛾={:.2}, 𝜀={:.3}, loss: {:.5}\n\
    action_distribution (of last {}): {}",
            self.episode_count.to_formatted_string(&number_format),
            self.step_count.to_formatted_string(&number_format),
            self.param.gamma,
            self.param.epsilon(self.step_count),
            mean_loss,
            total_actions.to_formatted_string(&number_format),
            action_distribution_line
        );
    }

    pub fn step_count(&self) -> usize { self.step_count }

    pub fn episode_count(&self) -> usize { self.episode_count }

    pub fn history(&self) -> &TrainingHistory { &self.history }

    pub fn replay_buffer(&self) -> &ReplayBuffer<Rc<StackedFrames>> { &self.replay_buffer }

    pub fn model(&self) -> &M { &self.model }

    pub fn param(&self) -> &Parameter { &self.param }
}

fn epsilon_greedy_action<M: DeepQLearningModel>(
    rng: &mut StdRng,
    model: &M,
    state: &StackedFrames,
    epsilon: f64,
) -> Result<ModelActionType> {
    if epsilon > rng.gen_range(0_f64..1_f64) {
        // Take random action
        Ok(rng.gen_range(0..model.num_actions()) as ModelActionType)
    } else {
        // Predict best action Q-values from environment state
        model.predict_action(state)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rstest::rstest;

    use crate::env::pipeline::PipelineConfig;
    use crate::ml_model::model::ParameterSet;
    use crate::prelude::ActionMeaning;
    use crate::test::linear_test_model::LinearTestModel;
    use crate::test::make_test_environment;
    use crate::test::scripted_environment::{ScriptedEnvironment, ScriptedStep};

    use super::*;

    /// Delegates to a [LinearTestModel] and records how it is used
    struct RecordingModel {
        inner: LinearTestModel,
        /// (parameter set, batch length) of every prediction
        predictions: RefCell<Vec<(ParameterSet, usize)>>,
        copies: usize,
    }

    impl DeepQLearningModel for RecordingModel {
        fn num_actions(&self) -> usize { self.inner.num_actions() }

        fn predict(
            &self,
            parameter_set: ParameterSet,
            states: &[&StackedFrames],
        ) -> Result<Vec<Vec<f32>>> {
            self.predictions.borrow_mut().push((parameter_set, states.len()));
            self.inner.predict(parameter_set, states)
        }

        fn update(
            &mut self,
            states: &[&StackedFrames],
            actions: &[ModelActionType],
            targets: &[f32],
        ) -> Result<f32> {
            self.inner.update(states, actions, targets)
        }

        fn copy_online_to_target(&mut self) -> Result<()> {
            self.copies += 1;
            self.inner.copy_online_to_target()
        }
    }

    fn small_pipeline(
        config: PipelineConfig,
        seed: u64,
    ) -> Result<EnvironmentPipeline> {
        let config = PipelineConfig {
            frame_width: 16,
            frame_height: 21,
            seed: Some(seed),
            ..config
        };
        EnvironmentPipeline::new(make_test_environment("catch", seed)?, &config)
    }

    fn linear_model(environment: &EnvironmentPipeline) -> LinearTestModel {
        LinearTestModel::new(environment.observation_shape().len(), environment.num_actions(), 0.001, 3)
    }

    fn small_learner(param: Parameter) -> Result<SelfDrivingQLearner<LinearTestModel>> {
        let environment = small_pipeline(PipelineConfig::training(), 1)?;
        let eval_environment = small_pipeline(PipelineConfig::evaluation(), 2)?;
        let model = linear_model(&environment);
        SelfDrivingQLearner::new(environment, eval_environment, model, param)
    }

    fn small_param() -> Parameter {
        Parameter {
            total_steps: 200,
            history_buffer_len: 100,
            warmup_steps: 50,
            update_after_actions: 4,
            update_target_network_after_num_steps: 40,
            batch_size: 8,
            epsilon_greedy_steps: 150,
            eval_after_steps: 1_000,
            eval_plays: 2,
            eval_episodes_per_play: 1,
            loss_report_after_steps: 50,
            episode_report_after_episodes: 1,
            seed: Some(42),
            ..Parameter::default()
        }
    }

    #[rstest]
    #[case(0, 1.0)]
    #[case(500_000, 0.55)]
    #[case(1_000_000, 0.1)]
    #[case(2_000_000, 0.1)]
    fn test_epsilon_schedule(
        #[case] step: usize,
        #[case] expected: f64,
    ) {
        let param = Parameter::default();
        assert!((param.epsilon(step) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_bootstrap_targets() {
        let targets = bootstrap_targets(&[1.0, 0.0], &[true, false], &[5.0, 2.0], 0.99);
        assert_eq!(targets[0], 1.0);
        assert!((targets[1] - 1.98).abs() < 1e-6);
    }

    #[test]
    fn test_default_parameter_is_valid() -> Result<()> { Parameter::default().validate() }

    #[rstest]
    #[case(Parameter { warmup_steps: 16, ..Parameter::default() })]
    #[case(Parameter { history_buffer_len: 16, ..Parameter::default() })]
    #[case(Parameter { update_after_actions: 0, ..Parameter::default() })]
    #[case(Parameter { gamma: 1.5, ..Parameter::default() })]
    #[case(Parameter { epsilon_min: 0.5, epsilon_max: 0.2, ..Parameter::default() })]
    fn test_invalid_parameter(#[case] param: Parameter) {
        assert!(param.validate().is_err());
    }

    #[test]
    fn test_rejects_model_with_wrong_number_of_actions() -> Result<()> {
        let environment = small_pipeline(PipelineConfig::training(), 1)?;
        let eval_environment = small_pipeline(PipelineConfig::evaluation(), 2)?;
        let model = LinearTestModel::new(environment.observation_shape().len(), environment.num_actions() + 1, 0.001, 3);
        assert!(SelfDrivingQLearner::new(environment, eval_environment, model, small_param()).is_err());
        Ok(())
    }

    #[test]
    fn test_learner_short_run() -> Result<()> {
        let mut learner = small_learner(small_param())?;
        learner.learn()?;

        assert_eq!(learner.step_count(), 200);
        assert_eq!(learner.replay_buffer().len(), 100);
        // steps 52..=200, every 4th
        assert_eq!(learner.history().losses.len(), 38);
        assert!(learner.history().losses.iter().all(|l| l.is_finite()));
        assert_eq!(learner.history().episode_rewards.len(), learner.episode_count());
        assert!(learner.history().eval_rewards.is_empty());
        Ok(())
    }

    #[test]
    fn test_no_learning_during_warmup() -> Result<()> {
        let mut learner = small_learner(small_param())?;
        for _ in 0..50 {
            learner.step()?;
        }
        assert!(learner.history().losses.is_empty());
        assert_eq!(learner.replay_buffer().len(), 50);
        Ok(())
    }

    #[test]
    fn test_evaluation_leaves_buffer_and_model_untouched() -> Result<()> {
        let mut learner = small_learner(small_param())?;
        for _ in 0..60 {
            learner.step()?;
        }
        let probe = Rc::clone(&learner.replay_buffer().get(0).unwrap().state);
        let online_before = learner.model().predict(ParameterSet::Online, &[probe.as_ref()])?;
        let target_before = learner.model().predict(ParameterSet::Target, &[probe.as_ref()])?;
        let buffer_len = learner.replay_buffer().len();
        let first_action = learner.replay_buffer().get(0).unwrap().action;

        let mean_reward = learner.evaluate()?;

        assert!(mean_reward.is_finite());
        assert_eq!(learner.replay_buffer().len(), buffer_len);
        assert_eq!(learner.replay_buffer().get(0).unwrap().action, first_action);
        assert_eq!(learner.model().predict(ParameterSet::Online, &[probe.as_ref()])?, online_before);
        assert_eq!(learner.model().predict(ParameterSet::Target, &[probe.as_ref()])?, target_before);
        assert_eq!(learner.step_count(), 60);
        Ok(())
    }

    #[test]
    fn test_periodic_evaluation_is_recorded() -> Result<()> {
        let param = Parameter {
            total_steps: 120,
            eval_after_steps: 60,
            ..small_param()
        };
        let mut learner = small_learner(param)?;
        learner.learn()?;
        let steps: Vec<usize> = learner.history().eval_rewards.iter().map(|(s, _)| *s).collect();
        assert_eq!(steps, vec![60, 120]);
        Ok(())
    }

    #[test]
    fn test_target_sync_interval_and_bootstrap_source() -> Result<()> {
        let environment = small_pipeline(PipelineConfig::training(), 1)?;
        let eval_environment = small_pipeline(PipelineConfig::evaluation(), 2)?;
        let model = RecordingModel {
            inner: linear_model(&environment),
            predictions: RefCell::new(vec![]),
            copies: 0,
        };
        let mut learner = SelfDrivingQLearner::new(environment, eval_environment, model, small_param())?;

        for _ in 0..200 {
            let copies_before = learner.model().copies;
            learner.step()?;
            let step = learner.step_count();
            let expected = usize::from(step > 50 && step % 40 == 0);
            assert_eq!(learner.model().copies - copies_before, expected, "step {}", step);
        }
        assert_eq!(learner.model().copies, 4);

        // bootstrap values come from the target parameters, one batch per learning step
        let predictions = learner.model().predictions.borrow();
        let target_batches: Vec<usize> = predictions
            .iter()
            .filter(|(set, _)| *set == ParameterSet::Target)
            .map(|(_, len)| *len)
            .collect();
        assert_eq!(target_batches.len(), learner.history().losses.len());
        assert_eq!(target_batches.len(), 38);
        assert!(target_batches.iter().all(|&len| len == 8));
        assert!(predictions.iter().filter(|(set, _)| *set == ParameterSet::Online).all(|(_, len)| *len == 1));
        Ok(())
    }

    #[test]
    fn test_evaluation_mean_is_total_reward_per_play() -> Result<()> {
        let environment = small_pipeline(PipelineConfig::training(), 1)?;
        // per episode: the one reset no-op, then a single terminal step with reward 1, 2, .., 6
        let script = (1..=6)
            .flat_map(|reward| [ScriptedStep::new(0.0, 3, false), ScriptedStep::new(reward as f32, 3, true)])
            .collect();
        let scripted = ScriptedEnvironment::new(script).with_action_meanings(vec![
            ActionMeaning::Noop,
            ActionMeaning::Right,
            ActionMeaning::Left,
            ActionMeaning::Down,
        ]);
        let counter = scripted.counter();
        let eval_config = PipelineConfig {
            noop_max: 1,
            skip: 1,
            episode_life: false,
            frame_width: 16,
            frame_height: 21,
            seed: Some(2),
            ..PipelineConfig::evaluation()
        };
        let eval_environment = EnvironmentPipeline::new(Box::new(scripted), &eval_config)?;
        let param = Parameter {
            eval_plays: 2,
            eval_episodes_per_play: 3,
            ..small_param()
        };
        let model = linear_model(&environment);
        let mut learner = SelfDrivingQLearner::new(environment, eval_environment, model, param)?;

        let mean_reward = learner.evaluate()?;

        // (1 + 2 + 3) + (4 + 5 + 6) over 2 plays
        assert_eq!(mean_reward, 10.5);
        assert_eq!(counter.resets.get(), 6);
        assert_eq!(counter.steps.get(), 12);
        Ok(())
    }
}
