//! Episode control stages, applied by the pipeline in this order:
//! no-op reset, max-and-skip, time limit, episodic life, fire reset, warp, scale, reward clip.

mod episode;
mod observation;
mod skip;

pub use episode::{EpisodicLife, FireReset, NoopReset, TimeLimit};
pub use observation::{clip_reward, ClipReward, ScaledFloat, Warp};
pub use skip::MaxAndSkip;
