//! Off-screen RGBA drawing surface.
//!
//! The re-encoder draws decoded source frames onto a [`Canvas`] sized to the
//! output resolution; the recorder consumes the canvas surface. Skipped
//! frames simply leave the previous surface in place.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};

/// A decoded video frame.
pub type VideoFrame = RgbaImage;

/// Resampling quality used when a frame is drawn at a different size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Smoothing {
    /// Nearest neighbour.
    Off,
    /// Bilinear.
    Low,
    /// Catmull-Rom bicubic.
    #[default]
    High,
}

impl Smoothing {
    fn filter(self) -> FilterType {
        match self {
            Smoothing::Off => FilterType::Nearest,
            Smoothing::Low => FilterType::Triangle,
            Smoothing::High => FilterType::CatmullRom,
        }
    }
}

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Fixed-size RGBA drawing surface.
#[derive(Debug, Clone)]
pub struct Canvas {
    surface: RgbaImage,
    smoothing: Smoothing,
    draws: u64,
}

impl Canvas {
    /// Create an opaque black canvas. Zero dimensions are raised to 1.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: RgbaImage::from_pixel(width.max(1), height.max(1), BLACK),
            smoothing: Smoothing::default(),
            draws: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn set_smoothing(&mut self, smoothing: Smoothing) {
        self.smoothing = smoothing;
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    /// Number of draw calls since creation.
    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    /// The current pixels.
    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Fill with opaque black.
    pub fn clear(&mut self) {
        for px in self.surface.pixels_mut() {
            *px = BLACK;
        }
    }

    /// Draw `frame` stretched to the full canvas.
    pub fn draw_frame(&mut self, frame: &VideoFrame) {
        if frame.dimensions() == self.surface.dimensions() {
            self.surface.copy_from_slice(frame.as_raw());
        } else {
            self.surface = imageops::resize(
                frame,
                self.surface.width(),
                self.surface.height(),
                self.smoothing.filter(),
            );
        }
        self.draws += 1;
    }

    /// Draw `frame` scaled to fit inside the canvas with its aspect ratio
    /// preserved, centred on black bars.
    pub fn draw_letterboxed(&mut self, frame: &VideoFrame) {
        let (cw, ch) = self.surface.dimensions();
        let (fw, fh) = frame.dimensions();
        self.clear();

        if fw == 0 || fh == 0 {
            self.draws += 1;
            return;
        }

        let scale = (cw as f64 / fw as f64).min(ch as f64 / fh as f64);
        let dw = ((fw as f64 * scale).round() as u32).clamp(1, cw);
        let dh = ((fh as f64 * scale).round() as u32).clamp(1, ch);
        let resized = imageops::resize(frame, dw, dh, self.smoothing.filter());

        let x = i64::from((cw - dw) / 2);
        let y = i64::from((ch - dh) / 2);
        imageops::overlay(&mut self.surface, &resized, x, y);
        self.draws += 1;
    }

    /// Serialize the surface as JPEG (alpha dropped).
    pub fn to_jpeg(&self, quality: u8) -> fp_core::Result<Vec<u8>> {
        let rgb = DynamicImage::ImageRgba8(self.surface.clone()).to_rgb8();
        let mut buf = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&rgb)
            .map_err(|e| fp_core::Error::Media(format!("JPEG encode failed: {e}")))?;
        Ok(buf.into_inner())
    }
}
