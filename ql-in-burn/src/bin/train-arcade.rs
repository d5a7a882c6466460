use anyhow::Result;
use clap::Parser;
use ql::env::pipeline::{EnvironmentPipeline, PipelineConfig};
use ql::learn::self_driving_q_learner::{Parameter, SelfDrivingQLearner};
use ql::log::init_logging;
use ql::test::make_test_environment;
use ql_in_burn::burn_q_learning_model::BurnQLearningModel;
use ql_in_burn::q_network::QNetworkConfig;
use ql_in_burn::DefaultBackend;

/// Trains a deep Q network on an arcade environment
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Identifier of the arcade environment
    #[arg(long, default_value = "catch")]
    env: String,
    #[arg(long, default_value_t = 2_000_000)]
    total_steps: usize,
    /// Capacity of the replay buffer
    #[arg(long, default_value_t = 10_000)]
    replay_capacity: usize,
    /// Steps to only collect experience before learning starts
    #[arg(long, default_value_t = 10_000)]
    warmup_steps: usize,
    /// Train the model after n actions
    #[arg(long, default_value_t = 4)]
    learn_interval: usize,
    /// Steps between target network synchronizations
    #[arg(long, default_value_t = 10_000)]
    sync_interval: usize,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 0.99)]
    gamma: f32,
    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,
    /// Steps between evaluations
    #[arg(long, default_value_t = 100_000)]
    eval_freq: usize,
    #[arg(long, default_value_t = 30)]
    eval_plays: usize,
    #[arg(long, default_value_t = 5)]
    eval_episodes_per_play: usize,
    /// Train on unclipped rewards
    #[arg(long)]
    no_reward_clipping: bool,
    /// Feed single frames instead of a stack of four
    #[arg(long)]
    no_frame_stack: bool,
    /// Keep u8 pixels instead of scaling them to [0,1]
    #[arg(long)]
    no_scale: bool,
    /// Upper bound of agent steps per episode
    #[arg(long)]
    max_episode_steps: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn pipeline_config(
        &self,
        base: PipelineConfig,
        seed_offset: u64,
    ) -> PipelineConfig {
        PipelineConfig {
            clip_rewards: base.clip_rewards && !self.no_reward_clipping,
            frame_stack: if self.no_frame_stack { None } else { base.frame_stack },
            scale: !self.no_scale,
            max_episode_steps: self.max_episode_steps,
            seed: self.seed.map(|s| s.wrapping_add(seed_offset)),
            ..base
        }
    }

    fn parameter(&self) -> Parameter {
        Parameter {
            total_steps: self.total_steps,
            history_buffer_len: self.replay_capacity,
            warmup_steps: self.warmup_steps,
            update_after_actions: self.learn_interval,
            update_target_network_after_num_steps: self.sync_interval,
            batch_size: self.batch_size,
            gamma: self.gamma,
            eval_after_steps: self.eval_freq,
            eval_plays: self.eval_plays,
            eval_episodes_per_play: self.eval_episodes_per_play,
            seed: self.seed,
            ..Parameter::default()
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    log::debug!("{:?}", args);

    let env_seed = args.seed.unwrap_or_else(rand::random);
    let environment = EnvironmentPipeline::new(
        make_test_environment(&args.env, env_seed)?,
        &args.pipeline_config(PipelineConfig::training(), 1),
    )?;
    // evaluation pipeline also evaluates on unclipped rewards
    let eval_environment = EnvironmentPipeline::new(
        make_test_environment(&args.env, env_seed.wrapping_add(1))?,
        &args.pipeline_config(PipelineConfig::evaluation(), 2),
    )?;

    let network_config = QNetworkConfig {
        learning_rate: args.learning_rate,
        ..QNetworkConfig::new(environment.observation_shape(), environment.num_actions())
    };
    let model = BurnQLearningModel::<DefaultBackend>::new(network_config, Default::default())?;

    let mut learner = SelfDrivingQLearner::new(environment, eval_environment, model, args.parameter())?;
    learner.learn()?;

    if let Some((step, reward)) = learner.history().eval_rewards.last() {
        log::info!("last evaluation at step {}: mean reward {:.2}", step, reward);
    }
    Ok(())
}
