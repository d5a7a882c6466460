pub mod frame;
pub mod frame_stack;
pub mod frame_transform;
pub mod pipeline;
pub mod stage;
pub mod wrappers;
