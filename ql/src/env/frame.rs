use std::fmt::{Display, Formatter};

use anyhow::Result;
use image::{ImageBuffer, Luma, Pixel, Rgb};
use itertools::Either;

use crate::prelude::QlError;

pub type RgbFrame = ImageBuffer<Rgb<u8>, Vec<u8>>;
// Gray-scaled image
pub type GrayFrame = ImageBuffer<Luma<u8>, Vec<u8>>;
pub type ScaledRgbFrame = ImageBuffer<Rgb<f32>, Vec<f32>>;
pub type ScaledGrayFrame = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelKind {
    /// intensities in [0,255]
    U8,
    /// intensities scaled to [0,1]
    F32,
}

/// Shape of a single frame: height x width x channels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub kind: PixelKind,
}

impl FrameShape {
    pub fn new(
        height: usize,
        width: usize,
        channels: usize,
        kind: PixelKind,
    ) -> Self {
        Self { height, width, channels, kind }
    }

    pub fn len(&self) -> usize { self.height * self.width * self.channels }

    pub fn dims(&self) -> [usize; 3] { [self.height, self.width, self.channels] }
}

impl Display for FrameShape {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}x{}x{} {:?}", self.height, self.width, self.channels, self.kind)
    }
}

/// A single screen image: RGB or gray, raw u8 or scaled f32 intensities
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Rgb(RgbFrame),
    Gray(GrayFrame),
    ScaledRgb(ScaledRgbFrame),
    ScaledGray(ScaledGrayFrame),
}

fn dims_error(
    len: usize,
    height: usize,
    width: usize,
    channels: usize,
) -> anyhow::Error {
    anyhow::Error::new(QlError(format!(
        "pixel buffer of len {} does not match frame dims {}x{}x{}",
        len, height, width, channels
    )))
}

/// Element-wise maximum of two images of identical dimensions
fn max_pool<P>(
    a: &ImageBuffer<P, Vec<P::Subpixel>>,
    b: &ImageBuffer<P, Vec<P::Subpixel>>,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    ImageBuffer::from_fn(a.width(), a.height(), |x, y| {
        a.get_pixel(x, y).map2(b.get_pixel(x, y), |p, q| if q > p { q } else { p })
    })
}

impl Frame {
    /// Builds a frame from row-major HWC pixel data; `channels` must be 1 (gray) or 3 (RGB)
    pub fn from_u8(
        height: usize,
        width: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let len = data.len();
        if height == 0 || width == 0 || len != height * width * channels {
            return Err(dims_error(len, height, width, channels));
        }
        let (w, h) = (width as u32, height as u32);
        let frame = match channels {
            1 => GrayFrame::from_raw(w, h, data).map(Frame::Gray),
            3 => RgbFrame::from_raw(w, h, data).map(Frame::Rgb),
            _ => None,
        };
        frame.ok_or_else(|| dims_error(len, height, width, channels))
    }

    pub fn from_f32(
        height: usize,
        width: usize,
        channels: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        let len = data.len();
        if height == 0 || width == 0 || len != height * width * channels {
            return Err(dims_error(len, height, width, channels));
        }
        let (w, h) = (width as u32, height as u32);
        let frame = match channels {
            1 => ScaledGrayFrame::from_raw(w, h, data).map(Frame::ScaledGray),
            3 => ScaledRgbFrame::from_raw(w, h, data).map(Frame::ScaledRgb),
            _ => None,
        };
        frame.ok_or_else(|| dims_error(len, height, width, channels))
    }

    pub fn shape(&self) -> FrameShape {
        let (width, height) = self.dimensions();
        let (channels, kind) = match self {
            Frame::Rgb(_) => (3, PixelKind::U8),
            Frame::Gray(_) => (1, PixelKind::U8),
            Frame::ScaledRgb(_) => (3, PixelKind::F32),
            Frame::ScaledGray(_) => (1, PixelKind::F32),
        };
        FrameShape::new(height as usize, width as usize, channels, kind)
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Rgb(i) => i.dimensions(),
            Frame::Gray(i) => i.dimensions(),
            Frame::ScaledRgb(i) => i.dimensions(),
            Frame::ScaledGray(i) => i.dimensions(),
        }
    }

    /// Raw HWC pixel data of u8 frames
    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Frame::Rgb(i) => Some(i.as_raw().as_slice()),
            Frame::Gray(i) => Some(i.as_raw().as_slice()),
            _ => None,
        }
    }

    /// Raw HWC pixel data of scaled frames
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Frame::ScaledRgb(i) => Some(i.as_raw().as_slice()),
            Frame::ScaledGray(i) => Some(i.as_raw().as_slice()),
            _ => None,
        }
    }

    /// All channel values in HWC order as f32 (u8 intensities are not rescaled)
    pub fn values_f32(&self) -> impl Iterator<Item = f32> + '_ {
        match self.as_u8() {
            Some(raw) => Either::Left(raw.iter().map(|&v| v as f32)),
            None => Either::Right(self.as_f32().unwrap_or_default().iter().copied()),
        }
    }

    /// Channel value as f32 (u8 pixels are not rescaled)
    pub fn get(
        &self,
        y: usize,
        x: usize,
        c: usize,
    ) -> f32 {
        let (x, y) = (x as u32, y as u32);
        match self {
            Frame::Rgb(i) => i.get_pixel(x, y).channels()[c] as f32,
            Frame::Gray(i) => i.get_pixel(x, y).channels()[c] as f32,
            Frame::ScaledRgb(i) => i.get_pixel(x, y).channels()[c],
            Frame::ScaledGray(i) => i.get_pixel(x, y).channels()[c],
        }
    }

    /// Pixel-wise maximum of two frames of identical shape
    pub fn max(
        &self,
        other: &Frame,
    ) -> Result<Frame> {
        let frame = match (self, other) {
            (Frame::Rgb(a), Frame::Rgb(b)) if a.dimensions() == b.dimensions() => Frame::Rgb(max_pool(a, b)),
            (Frame::Gray(a), Frame::Gray(b)) if a.dimensions() == b.dimensions() => Frame::Gray(max_pool(a, b)),
            (Frame::ScaledRgb(a), Frame::ScaledRgb(b)) if a.dimensions() == b.dimensions() => Frame::ScaledRgb(max_pool(a, b)),
            (Frame::ScaledGray(a), Frame::ScaledGray(b)) if a.dimensions() == b.dimensions() => Frame::ScaledGray(max_pool(a, b)),
            _ => Err(QlError(format!("cannot max-pool frames of shape {} and {}", self.shape(), other.shape())))?,
        };
        Ok(frame)
    }
}
