//! [`MediaRuntime`] implementation backed by ffmpeg and ffprobe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fp_core::{Error, SourceMedia};
use fp_media::{
    AudioGraph, AudioTrack, CaptureStream, MediaElement, MediaRuntime, Recorder, RecorderOptions,
    TrackOrigin,
};

use crate::capabilities::Capabilities;
use crate::probe::FfprobeProber;
use crate::recorder::{EncoderSpec, FfmpegRecorder};
use crate::source::FfmpegElement;
use crate::tools::ToolRegistry;
use crate::workspace::Workspace;

/// Bitrate hints outside these ranges are rejected as overconstrained.
const VIDEO_BITRATE_RANGE: std::ops::RangeInclusive<u64> = 50_000..=60_000_000;
const AUDIO_BITRATE_RANGE: std::ops::RangeInclusive<u64> = 6_000..=512_000;

/// Preference order for the platform-default recorder.
const DEFAULT_MIMES: &[&str] = &["video/webm", "video/mp4"];

/// The local ffmpeg installation as a media runtime.
#[derive(Debug)]
pub struct FfmpegRuntime {
    ffmpeg: PathBuf,
    prober: FfprobeProber,
    capabilities: Capabilities,
    workspace: Workspace,
    default_mime: Option<&'static str>,
}

impl FfmpegRuntime {
    /// Locate ffmpeg/ffprobe through `tools` and probe encoder support.
    pub async fn new(tools: &ToolRegistry, probe_timeout: Duration) -> fp_core::Result<Self> {
        let ffmpeg = tools.require("ffmpeg")?.to_path_buf();
        let ffprobe = tools.require("ffprobe")?.to_path_buf();
        let capabilities = Capabilities::probe(&ffmpeg).await?;
        Self::with_capabilities(ffmpeg, ffprobe, capabilities, probe_timeout)
    }

    /// Build with known capabilities instead of probing.
    pub fn with_capabilities(
        ffmpeg: PathBuf,
        ffprobe: PathBuf,
        capabilities: Capabilities,
        probe_timeout: Duration,
    ) -> fp_core::Result<Self> {
        let default_mime = DEFAULT_MIMES
            .iter()
            .copied()
            .find(|m| capabilities.supports(m));
        if default_mime.is_none() {
            tracing::warn!("ffmpeg supports neither WebM nor MP4 encoding");
        }
        Ok(Self {
            ffmpeg,
            prober: FfprobeProber::new(ffprobe).with_timeout(probe_timeout),
            capabilities,
            workspace: Workspace::new()?,
            default_mime,
        })
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn prober(&self) -> &FfprobeProber {
        &self.prober
    }

    /// Why `options` would be rejected, if they would be.
    fn rejection(&self, options: &RecorderOptions) -> Option<String> {
        if let Some(v) = options.video_bitrate_bps {
            if !VIDEO_BITRATE_RANGE.contains(&v) {
                return Some(format!("OverconstrainedError: video bitrate {v}"));
            }
        }
        if let Some(a) = options.audio_bitrate_bps {
            if !AUDIO_BITRATE_RANGE.contains(&a) {
                return Some(format!("OverconstrainedError: audio bitrate {a}"));
            }
        }
        None
    }
}

#[async_trait]
impl MediaRuntime for FfmpegRuntime {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.capabilities.supports(mime_type)
    }

    async fn load(&self, source: &SourceMedia) -> fp_core::Result<Box<dyn MediaElement>> {
        let path = self.workspace.materialize(source).await?;
        let metadata = self
            .prober
            .probe(&path)
            .await
            .map_err(|e| Error::Media(format!("cannot load {}: {e}", source.name())))?;
        if metadata.width == 0 || metadata.height == 0 {
            return Err(Error::Media(format!("{} has no decodable video", source.name())));
        }
        tracing::debug!(
            source = source.name(),
            duration = metadata.duration_secs,
            width = metadata.width,
            height = metadata.height,
            audio_streams = metadata.audio_streams.len(),
            "loaded source"
        );
        Ok(Box::new(FfmpegElement::new(self.ffmpeg.clone(), path, metadata)))
    }

    fn create_recorder(
        &self,
        stream: &CaptureStream,
        options: &RecorderOptions,
    ) -> fp_core::Result<Box<dyn Recorder>> {
        let mime = match (&options.mime_type, self.default_mime) {
            (Some(m), _) => m.clone(),
            (None, Some(m)) => m.to_string(),
            (None, None) => {
                return Err(Error::Recorder("NotSupportedError: no default recorder".into()))
            }
        };
        let choice = self
            .capabilities
            .resolve(&mime)
            .ok_or_else(|| Error::Recorder(format!("NotSupportedError: {mime}")))?;
        if let Some(reason) = self.rejection(options) {
            return Err(Error::Recorder(reason));
        }

        let spec = EncoderSpec::new(
            mime,
            choice,
            stream,
            options.video_bitrate_bps,
            options.audio_bitrate_bps,
        );
        Ok(Box::new(FfmpegRecorder::new(self.ffmpeg.clone(), spec)))
    }

    fn create_audio_graph(&self) -> fp_core::Result<Box<dyn AudioGraph>> {
        Ok(Box::new(FfmpegAudioGraph::default()))
    }
}

// ---------------------------------------------------------------------------
// Audio graph
// ---------------------------------------------------------------------------

/// Audio routing for the ffmpeg runtime.
///
/// ffmpeg muxes audio straight from the source file, so connecting an
/// element only turns its audio streams into file-backed tracks.
#[derive(Default)]
pub struct FfmpegAudioGraph {
    element: Option<Box<dyn MediaElement>>,
}

pub(crate) fn tracks_for(path: &Path, element: &dyn MediaElement) -> Vec<AudioTrack> {
    element
        .metadata()
        .audio_streams
        .iter()
        .map(|s| AudioTrack {
            label: format!("{}#{}", path.display(), s.index),
            channels: s.channels,
            sample_rate: s.sample_rate.unwrap_or(48_000),
            origin: TrackOrigin::File {
                path: path.to_path_buf(),
                stream_index: s.index,
            },
        })
        .collect()
}

#[async_trait]
impl AudioGraph for FfmpegAudioGraph {
    async fn resume(&mut self) -> fp_core::Result<()> {
        Ok(())
    }

    async fn connect(&mut self, element: Box<dyn MediaElement>) -> fp_core::Result<Vec<AudioTrack>> {
        let path = element
            .source_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::AudioAttach("element is not file-backed".to_string()))?;
        let tracks = tracks_for(&path, element.as_ref());
        self.element = Some(element);
        Ok(tracks)
    }

    async fn close(&mut self) {
        if let Some(mut element) = self.element.take() {
            element.close().await;
        }
    }
}
