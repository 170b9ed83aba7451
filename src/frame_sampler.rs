use log::trace;
use serde::Deserialize;

/// Size of the centred square region cropped out of each frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RoiSize {
    /// Fixed side length in pixels (clipped to the frame)
    Fixed { side: u32 },
    /// Fraction of the shorter frame dimension
    Fraction { fraction: f64 },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub roi: RoiSize,
    /// Side of the square canvas the ROI is drawn into
    pub canvas_side: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            roi: RoiSize::Fixed { side: 50 },
            canvas_side: 50,
        }
    }
}

/// A borrowed RGBA8 video frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(width: u32, height: u32, rgba: &'a [u8]) -> Self {
        Self {
            width,
            height,
            rgba,
        }
    }

    /// Zero-sized frames come from a stream that has not produced video yet.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Reduces frames to the mean red intensity of a small central patch.
pub struct FrameSampler {
    config: SamplerConfig,
    canvas: Vec<u8>,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        let side = config.canvas_side.max(1) as usize;
        Self {
            config,
            canvas: vec![0; side * side * 4],
        }
    }

    /// Side of the ROI cropped from a `width`x`height` frame.
    pub fn roi_side(&self, width: u32, height: u32) -> u32 {
        let shorter = width.min(height);
        let side = match self.config.roi {
            RoiSize::Fixed { side } => side,
            RoiSize::Fraction { fraction } => (shorter as f64 * fraction).round() as u32,
        };
        side.clamp(1, shorter.max(1))
    }

    /// Mean red value (0-255) of the centred ROI.
    ///
    /// Returns `None` when the frame is not ready or its buffer is shorter
    /// than `width * height * 4` bytes.
    pub fn sample(&mut self, frame: &Frame) -> Option<f64> {
        if !frame.is_ready() {
            return None;
        }
        let (w, h) = (frame.width as usize, frame.height as usize);
        if frame.rgba.len() < w * h * 4 {
            trace!(
                "Frame buffer too short: {} bytes for {}x{}",
                frame.rgba.len(),
                w,
                h
            );
            return None;
        }

        let side = self.roi_side(frame.width, frame.height) as usize;
        let sx = (w - side) / 2;
        let sy = (h - side) / 2;
        let canvas_side = self.config.canvas_side.max(1) as usize;

        // Nearest-neighbour draw of the crop into the canvas
        for cy in 0..canvas_side {
            let src_y = sy + (2 * cy + 1) * side / (2 * canvas_side);
            for cx in 0..canvas_side {
                let src_x = sx + (2 * cx + 1) * side / (2 * canvas_side);
                let src = (src_y * w + src_x) * 4;
                let dst = (cy * canvas_side + cx) * 4;
                self.canvas[dst..dst + 4].copy_from_slice(&frame.rgba[src..src + 4]);
            }
        }

        Some(mean_red(&self.canvas))
    }
}

/// Arithmetic mean of the red channel of an RGBA byte buffer.
///
/// An empty buffer yields NaN, which batch cleaning later carries forward.
pub fn mean_red(rgba: &[u8]) -> f64 {
    let (sum, count) = rgba
        .iter()
        .step_by(4)
        .fold((0u64, 0usize), |(sum, count), &r| (sum + r as u64, count + 1));
    sum as f64 / count as f64
}
