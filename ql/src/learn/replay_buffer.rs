use std::collections::VecDeque;

use anyhow::Result;
use rand::Rng;

use crate::prelude::{ModelActionType, QlError};

/// One step of experience
#[derive(Clone, Debug)]
pub struct Transition<S> {
    pub state: S,
    pub action: ModelActionType,
    pub state_next: S,
    pub reward: f32,
    /// the (life-based) episode ended with this step
    pub done: bool,
}

/// Experience replay buffer: keeps the most recent `max_buffer_len` transitions
pub struct ReplayBuffer<S> {
    max_buffer_len: usize,
    buffer: VecDeque<Transition<S>>,
}

impl<S> ReplayBuffer<S> {
    pub fn new(max_buffer_len: usize) -> Self {
        assert!(max_buffer_len > 0);
        Self {
            max_buffer_len,
            buffer: VecDeque::with_capacity(max_buffer_len),
        }
    }

    pub fn len(&self) -> usize { self.buffer.len() }

    pub fn is_empty(&self) -> bool { self.buffer.is_empty() }

    pub fn capacity(&self) -> usize { self.max_buffer_len }

    /// Adds a transition; evicts the oldest one when full
    pub fn push(
        &mut self,
        transition: Transition<S>,
    ) {
        if self.buffer.len() == self.max_buffer_len {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Draws `batch_size` distinct transitions uniformly at random
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        batch_size: usize,
    ) -> Result<Vec<&Transition<S>>> {
        if batch_size > self.buffer.len() {
            Err(QlError(format!(
                "cannot sample {} transitions from a replay buffer holding {}",
                batch_size,
                self.buffer.len()
            )))?
        }
        Ok(generate_distinct_random_ids(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect())
    }

    pub fn get(
        &self,
        index: usize,
    ) -> Option<&Transition<S>> {
        self.buffer.get(index)
    }

    pub fn actions(&self) -> impl Iterator<Item = ModelActionType> + '_ { self.buffer.iter().map(|t| t.action) }
}

/// `amount` distinct indices out of `0..len`
fn generate_distinct_random_ids<R: Rng + ?Sized>(
    rng: &mut R,
    len: usize,
    amount: usize,
) -> Vec<usize> {
    rand::seq::index::sample(rng, len, amount).into_vec()
}
