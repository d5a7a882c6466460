//! Collaborators for tests and demos: a small arcade game, a scripted environment and a linear model.

use anyhow::Result;

use crate::prelude::{ArcadeEnvironment, QlError};

pub mod arcade_test_environment;

/// Creates one of the built-in test environments by its identifier
pub fn make_test_environment(
    id: &str,
    seed: u64,
) -> Result<Box<dyn ArcadeEnvironment>> {
    match id {
        arcade_test_environment::CATCH_ID => Ok(Box::new(arcade_test_environment::CatchTestEnvironment::new(seed))),
        _ => Err(QlError(format!("unknown environment '{}'", id)))?,
    }
}
