//! Still-frame thumbnails.

use std::time::Duration;

use bytes::Bytes;
use fp_core::config::CompressionConfig;
use fp_core::{Error, ImageBlob, SourceMedia};
use fp_media::{Canvas, MediaElement, MediaRuntime, Smoothing};

/// Where and how to rasterize a thumbnail.
#[derive(Debug, Clone)]
pub struct ThumbnailOptions {
    /// Preferred timestamp; clamped to one second before the end.
    pub at_secs: f64,
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1-100).
    pub quality: u8,
    pub metadata_timeout: Duration,
    pub seek_timeout: Duration,
}

impl Default for ThumbnailOptions {
    fn default() -> Self {
        Self::from(&CompressionConfig::default())
    }
}

impl From<&CompressionConfig> for ThumbnailOptions {
    fn from(config: &CompressionConfig) -> Self {
        Self {
            at_secs: config.thumbnail_at_secs,
            width: config.thumbnail_width,
            height: config.thumbnail_height,
            quality: config.thumbnail_quality,
            metadata_timeout: config.metadata_timeout(),
            seek_timeout: config.seek_timeout(),
        }
    }
}

/// Seek target for a source of `duration_secs`.
pub fn thumbnail_time(at_secs: f64, duration_secs: f64) -> f64 {
    at_secs.min(duration_secs - 1.0).max(0.0)
}

/// Rasterize one frame of `source` as a letterboxed JPEG.
///
/// # Errors
///
/// Every failure is reported as [`Error::Thumbnail`]. The media element
/// opened here is closed on every path.
pub async fn extract_thumbnail(
    runtime: &dyn MediaRuntime,
    source: &SourceMedia,
    options: &ThumbnailOptions,
) -> fp_core::Result<ImageBlob> {
    let mut element = tokio::time::timeout(options.metadata_timeout, runtime.load(source))
        .await
        .map_err(|_| {
            Error::Thumbnail(format!(
                "metadata load timed out after {:?}",
                options.metadata_timeout
            ))
        })?
        .map_err(|e| Error::Thumbnail(format!("metadata load failed: {e}")))?;

    let result = rasterize(element.as_mut(), options).await;
    element.close().await;

    match result {
        Ok(blob) => {
            tracing::debug!(
                source = source.name(),
                bytes = blob.data.len(),
                "thumbnail extracted"
            );
            Ok(blob)
        }
        Err(e @ Error::Thumbnail(_)) => Err(e),
        Err(e) => Err(Error::Thumbnail(e.to_string())),
    }
}

async fn rasterize(
    element: &mut dyn MediaElement,
    options: &ThumbnailOptions,
) -> fp_core::Result<ImageBlob> {
    let at = thumbnail_time(options.at_secs, element.metadata().duration_secs);

    tokio::time::timeout(options.seek_timeout, element.seek(at))
        .await
        .map_err(|_| Error::Thumbnail(format!("seek to {at:.2}s timed out")))??;
    let frame = tokio::time::timeout(options.seek_timeout, element.decode_frame())
        .await
        .map_err(|_| Error::Thumbnail(format!("decode at {at:.2}s timed out")))??;

    let mut canvas = Canvas::new(options.width, options.height);
    canvas.set_smoothing(Smoothing::High);
    canvas.draw_letterboxed(&frame);
    let jpeg = canvas.to_jpeg(options.quality)?;

    Ok(ImageBlob {
        mime_type: "image/jpeg".to_string(),
        width: canvas.width(),
        height: canvas.height(),
        data: Bytes::from(jpeg),
    })
}
