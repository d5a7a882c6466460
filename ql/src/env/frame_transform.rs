//! Stateless per-frame conversions: grayscale reduction, area-averaging resize, intensity scaling.

use anyhow::Result;
use image::{ImageBuffer, Luma, Pixel, Rgb};

use crate::env::frame::{Frame, FrameShape, GrayFrame, PixelKind, RgbFrame, ScaledGrayFrame, ScaledRgbFrame};
use crate::prelude::QlError;

// BT.601 luma weights in 14-bit fixed point
const R2Y: u32 = 4899;
const G2Y: u32 = 9617;
const B2Y: u32 = 1868;
const Y_SHIFT: u32 = 14;

/// Resizes frames to `height` x `width` and optionally reduces RGB to grayscale
#[derive(Clone, Copy, Debug)]
pub struct FrameTransform {
    pub height: usize,
    pub width: usize,
    pub grayscale: bool,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            height: 84,
            width: 84,
            grayscale: true,
        }
    }
}

impl FrameTransform {
    /// Shape of the frames produced from input frames of shape `input`
    pub fn output_shape(
        &self,
        input: FrameShape,
    ) -> FrameShape {
        let channels = if self.grayscale { 1 } else { input.channels };
        FrameShape::new(self.height, self.width, channels, PixelKind::U8)
    }

    /// Checks that frames of shape `input` can be transformed
    pub fn check_input(
        &self,
        input: FrameShape,
    ) -> Result<()> {
        if input.kind != PixelKind::U8 {
            Err(QlError(format!("frame transform requires u8 frames, got {}", input)))?
        }
        // gray frames pass the grayscale reduction unchanged
        let channels_ok = input.channels == 3 || input.channels == 1;
        if !channels_ok || self.height == 0 || self.width == 0 {
            Err(QlError(format!("frame transform to {}x{} cannot handle frames of shape {}", self.height, self.width, input)))?
        }
        Ok(())
    }

    pub fn transform(
        &self,
        frame: &Frame,
    ) -> Result<Frame> {
        self.check_input(frame.shape())?;
        let reduced;
        let frame = match frame {
            Frame::Rgb(rgb) if self.grayscale => {
                reduced = Frame::Gray(to_grayscale(rgb));
                &reduced
            }
            _ => frame,
        };
        resize_area(frame, self.height, self.width)
    }
}

/// RGB -> single channel luma
pub fn to_grayscale(image: &RgbFrame) -> GrayFrame {
    GrayFrame::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        Luma([((r as u32 * R2Y + g as u32 * G2Y + b as u32 * B2Y + (1 << (Y_SHIFT - 1))) >> Y_SHIFT) as u8])
    })
}

/// Contribution of source cells to one destination cell along one axis
type AxisWeights = Vec<Vec<(usize, f64)>>;

/// Each destination cell covers `[d * scale, (d + 1) * scale)` in source coordinates and collects the source cells
/// it overlaps, weighted by the overlap length. Weights per destination cell sum up to 1.
fn area_weights(
    src_len: usize,
    dst_len: usize,
) -> AxisWeights {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let mut weights = vec![];
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src_len {
                let overlap = f64::min(end, (s + 1) as f64) - f64::max(start, s as f64);
                if overlap > 1e-9 {
                    weights.push((s, overlap / scale));
                }
                s += 1;
            }
            weights
        })
        .collect()
}

fn resize_image_area<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    height: usize,
    width: usize,
    to_subpixel: impl Fn(f64) -> P::Subpixel,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
    P::Subpixel: Into<f64>,
{
    let rows = area_weights(image.height() as usize, height);
    let cols = area_weights(image.width() as usize, width);
    ImageBuffer::from_fn(width as u32, height as u32, |dx, dy| {
        let mut acc = [0_f64; 4];
        for &(sy, wy) in &rows[dy as usize] {
            for &(sx, wx) in &cols[dx as usize] {
                let source = image.get_pixel(sx as u32, sy as u32);
                for (a, &v) in acc.iter_mut().zip(source.channels()) {
                    *a += wy * wx * Into::<f64>::into(v);
                }
            }
        }
        let channels: Vec<P::Subpixel> = acc[..P::CHANNEL_COUNT as usize].iter().map(|&a| to_subpixel(a)).collect();
        *P::from_slice(&channels)
    })
}

/// Area-averaging interpolation (the pixel-area relation used for decimation).
///
/// Resizing to the same dimensions returns an identical frame. u8 results are rounded half to even.
pub fn resize_area(
    frame: &Frame,
    height: usize,
    width: usize,
) -> Result<Frame> {
    if height == 0 || width == 0 {
        Err(QlError(format!("cannot resize to {}x{}", height, width)))?
    }
    let shape = frame.shape();
    if shape.height == height && shape.width == width {
        return Ok(frame.clone());
    }
    let to_u8 = |v: f64| v.round_ties_even().clamp(0.0, 255.0) as u8;
    let resized = match frame {
        Frame::Rgb(i) => Frame::Rgb(resize_image_area(i, height, width, to_u8)),
        Frame::Gray(i) => Frame::Gray(resize_image_area(i, height, width, to_u8)),
        Frame::ScaledRgb(i) => Frame::ScaledRgb(resize_image_area(i, height, width, |v| v as f32)),
        Frame::ScaledGray(i) => Frame::ScaledGray(resize_image_area(i, height, width, |v| v as f32)),
    };
    Ok(resized)
}

/// Divides u8 intensities by 255, producing f32 pixels in [0,1]
pub fn scale_to_unit(frame: &Frame) -> Result<Frame> {
    let scaled = match frame {
        Frame::Rgb(i) => Frame::ScaledRgb(ScaledRgbFrame::from_fn(i.width(), i.height(), |x, y| {
            Rgb(i.get_pixel(x, y).0.map(|v| v as f32 / 255.0))
        })),
        Frame::Gray(i) => Frame::ScaledGray(ScaledGrayFrame::from_fn(i.width(), i.height(), |x, y| {
            Luma([i.get_pixel(x, y).0[0] as f32 / 255.0])
        })),
        _ => Err(QlError(format!("scaling requires u8 frames, got {}", frame.shape())))?,
    };
    Ok(scaled)
}
