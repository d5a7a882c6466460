use std::rc::Rc;

use anyhow::Result;
use ql::env::frame_stack::StackedFrames;
use ql::env::pipeline::{EnvironmentPipeline, PipelineConfig};
use ql::ml_model::model::{DeepQLearningModel, ParameterSet};
use ql::test::make_test_environment;
use ql_in_burn::burn_q_learning_model::BurnQLearningModel;
use ql_in_burn::q_network::QNetworkConfig;
use ql_in_burn::DefaultBackend;

fn pipeline(
    config: PipelineConfig,
    seed: u64,
) -> Result<EnvironmentPipeline> {
    let config = PipelineConfig {
        frame_width: 40,
        frame_height: 40,
        seed: Some(seed),
        ..config
    };
    EnvironmentPipeline::new(make_test_environment("catch", seed)?, &config)
}

fn model(environment: &EnvironmentPipeline) -> Result<BurnQLearningModel<DefaultBackend>> {
    let config = QNetworkConfig::new(environment.observation_shape(), environment.num_actions());
    BurnQLearningModel::new(config, Default::default())
}

fn observations(n: usize) -> Result<Vec<Rc<StackedFrames>>> {
    let mut environment = pipeline(PipelineConfig::training(), 11)?;
    let mut result = vec![environment.reset()?];
    while result.len() < n {
        let step = environment.step(1)?;
        result.push(match step.done {
            true => environment.reset()?,
            false => step.observation,
        });
    }
    Ok(result)
}

#[test]
fn test_target_equals_online_after_sync() -> Result<()> {
    let environment = pipeline(PipelineConfig::training(), 10)?;
    let mut model = model(&environment)?;
    let states = observations(8)?;
    let states: Vec<&StackedFrames> = states.iter().map(|s| s.as_ref()).collect();

    model.update(&states, &[0, 1, 2, 3, 0, 1, 2, 3], &[1.0, 0.0, -1.0, 0.5, 1.0, 0.0, -1.0, 0.5])?;
    assert_ne!(model.predict(ParameterSet::Online, &states)?, model.predict(ParameterSet::Target, &states)?);

    model.copy_online_to_target()?;
    assert_eq!(model.predict(ParameterSet::Online, &states)?, model.predict(ParameterSet::Target, &states)?);
    Ok(())
}
