use std::cell::OnceCell;
use std::rc::Rc;

use anyhow::Result;

use crate::env::frame::{Frame, FrameShape};
use crate::prelude::QlError;

/// The `k` most recent frames, oldest first, logically concatenated along the channel axis.
///
/// Holds shared references only; consecutive observations share `k - 1` of their frames.
/// The concatenated array is materialized on first use and kept for the lifetime of the view.
#[derive(Clone, Debug)]
pub struct StackedFrames {
    frames: Vec<Rc<Frame>>,
    values: OnceCell<Vec<f32>>,
}

impl StackedFrames {
    fn new(frames: Vec<Rc<Frame>>) -> Self {
        Self {
            frames,
            values: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize { self.frames.len() }

    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// `i = 0` is the oldest frame
    pub fn frame(
        &self,
        i: usize,
    ) -> &Frame {
        &self.frames[i]
    }

    pub fn frames(&self) -> &[Rc<Frame>] { &self.frames }

    /// Shape of the materialized array: H x W x (C * k)
    pub fn shape(&self) -> FrameShape {
        let single = self.frames[0].shape();
        FrameShape {
            channels: single.channels * self.frames.len(),
            ..single
        }
    }

    /// Number of values of the materialized array
    pub fn num_values(&self) -> usize { self.shape().len() }

    /// The concatenated frames in HWC layout
    pub fn values(&self) -> &[f32] {
        self.values.get_or_init(|| {
            let k = self.frames.len();
            let channels = self.frames[0].shape().channels;
            let mut out = vec![0.0; self.num_values()];
            for (i, frame) in self.frames.iter().enumerate() {
                for (j, v) in frame.values_f32().enumerate() {
                    let (p, c) = (j / channels, j % channels);
                    out[p * channels * k + i * channels + c] = v;
                }
            }
            out
        })
    }

    /// Copies the concatenated frames into `out`
    pub fn write_f32(
        &self,
        out: &mut [f32],
    ) -> Result<()> {
        if out.len() != self.num_values() {
            Err(QlError(format!("target buffer of len {} does not fit stacked frames of shape {}", out.len(), self.shape())))?
        }
        out.copy_from_slice(self.values());
        Ok(())
    }

    pub fn to_f32_vec(&self) -> Vec<f32> { self.values().to_vec() }
}

/// Fixed ring of the `k` most recent frames
pub struct FrameStack {
    k: usize,
    buffer: Vec<Rc<Frame>>,
    next_slot: usize,
    /// materialized view of the current stack, invalidated on every push
    view: Option<Rc<StackedFrames>>,
}

impl FrameStack {
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            Err(QlError::from("frame stack needs at least one frame"))?
        }
        Ok(Self {
            k,
            buffer: Vec::with_capacity(k),
            next_slot: 0,
            view: None,
        })
    }

    pub fn k(&self) -> usize { self.k }

    /// Fills all `k` slots with `frame`
    pub fn reset(
        &mut self,
        frame: Frame,
    ) -> Rc<StackedFrames> {
        let frame = Rc::new(frame);
        self.buffer = vec![frame; self.k];
        self.next_slot = 0;
        self.view = None;
        self.observation()
    }

    pub fn push(
        &mut self,
        frame: Frame,
    ) -> Result<Rc<StackedFrames>> {
        if self.buffer.len() != self.k {
            Err(QlError::from("frame stack must be reset before the first push"))?
        }
        if frame.shape() != self.buffer[0].shape() {
            Err(QlError(format!("frame of shape {} does not fit stack of {}", frame.shape(), self.buffer[0].shape())))?
        }
        self.buffer[self.next_slot] = Rc::new(frame);
        self.next_slot = (self.next_slot + 1) % self.k;
        self.view = None;
        Ok(self.observation())
    }

    /// Current stack, oldest frame first
    pub fn observation(&mut self) -> Rc<StackedFrames> {
        let (k, next_slot, buffer) = (self.k, self.next_slot, &self.buffer);
        let view = self.view.get_or_insert_with(|| {
            Rc::new(StackedFrames::new(
                (0..k).map(|i| Rc::clone(&buffer[(next_slot + i) % k])).collect(),
            ))
        });
        Rc::clone(view)
    }
}
