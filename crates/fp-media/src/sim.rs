//! Deterministic in-memory media runtime.
//!
//! [`SimRuntime`] behaves like a platform media stack without decoding or
//! encoding anything real: sources are synthetic gradients described by
//! [`SimSource`] metadata, recorders emit placeholder chunks whose size
//! follows the frame geometry (or the bitrate hint, when one was accepted),
//! and every interaction is appended to an ordered event log that tests can
//! inspect. Faults (rejected recorder options, failing writes, hanging
//! loads and seeks, broken audio graphs) are injected through the builder.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::{AudioStreamInfo, Error, MediaMetadata, MimeType, Result, SourceMedia};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::canvas::VideoFrame;
use crate::runtime::{AudioGraph, MediaElement, MediaRuntime, Recorder};
use crate::stream::{AudioTrack, CaptureStream, RecorderOptions, RecorderState, TrackOrigin};

/// Bytes emitted for a frame identical to the previous one.
pub const HELD_FRAME_BYTES: usize = 64;

const CHUNK_FRAMES: u64 = 30;

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// How a simulated operation misbehaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Resolve immediately with an error.
    Fail(String),
    /// Never resolve.
    Hang,
}

impl Fault {
    async fn trigger(&self, what: &str) -> Result<()> {
        tracing::debug!(what, fault = ?self, "injecting fault");
        match self {
            Fault::Fail(msg) => Err(Error::Media(format!("{what}: {msg}"))),
            Fault::Hang => std::future::pending().await,
        }
    }
}

/// Faults applied to one opened media element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementFault {
    pub load: Option<Fault>,
    pub seek: Option<Fault>,
    pub decode: Option<Fault>,
}

/// Audio graph misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFault {
    /// The graph cannot be created.
    Unavailable,
    /// `resume` never completes.
    NeverResumes,
    /// `connect` never completes.
    DecodeHangs,
    /// `connect` succeeds but yields no tracks.
    NoTracks,
}

/// Decides whether recorder options are rejected; `Some(reason)` rejects.
pub type RecorderPolicy = Arc<dyn Fn(&RecorderOptions) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct WriteFault {
    after_frames: u64,
    recorders: usize,
}

// ---------------------------------------------------------------------------
// Sources and events
// ---------------------------------------------------------------------------

/// Metadata of a simulated source.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSource {
    metadata: MediaMetadata,
}

impl SimSource {
    /// A silent source.
    pub fn new(duration_secs: f64, width: u32, height: u32) -> Self {
        Self {
            metadata: MediaMetadata {
                duration_secs,
                width,
                height,
                frame_rate: Some(30.0),
                audio_streams: Vec::new(),
            },
        }
    }

    /// Add an audio stream with `channels` channels at 48 kHz.
    pub fn with_audio(mut self, channels: u16) -> Self {
        let index = self.metadata.audio_streams.len() + 1;
        self.metadata.audio_streams.push(AudioStreamInfo {
            index,
            codec: Some("opus".to_string()),
            channels,
            sample_rate: Some(48_000),
        });
        self
    }

    pub fn metadata(&self) -> &MediaMetadata {
        &self.metadata
    }
}

impl Default for SimSource {
    fn default() -> Self {
        SimSource::new(4.0, 320, 180).with_audio(2)
    }
}

/// One entry of the runtime's event log.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Loaded { name: String, index: usize },
    Seeked { secs: f64 },
    Played { muted: bool, volume: f64 },
    ElementClosed,
    AudioConnected { tracks: usize },
    GraphClosed,
    RecorderRequested {
        options: RecorderOptions,
        accepted: bool,
        audio_tracks: usize,
    },
    RecorderStarted { mime: String },
    RecorderStopped { mime: String, bytes: usize, frames: u64 },
    RecorderAborted { mime: String },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures a [`SimRuntime`].
pub struct SimRuntimeBuilder {
    support: HashMap<String, Vec<String>>,
    video_only: HashSet<String>,
    default_mime: Option<String>,
    sources: HashMap<String, SimSource>,
    default_source: SimSource,
    policy: Option<RecorderPolicy>,
    max_video_bitrate: Option<u64>,
    write_fault: Option<WriteFault>,
    element_faults: HashMap<usize, ElementFault>,
    every_element: ElementFault,
    audio_fault: Option<AudioFault>,
}

impl Default for SimRuntimeBuilder {
    fn default() -> Self {
        let mut support = HashMap::new();
        support.insert(
            "video/mp4".to_string(),
            vec!["avc1".to_string(), "h264".to_string(), "mp4a".to_string()],
        );
        support.insert(
            "video/webm".to_string(),
            vec!["vp9".to_string(), "vp8".to_string(), "opus".to_string()],
        );
        Self {
            support,
            video_only: HashSet::new(),
            default_mime: Some("video/webm".to_string()),
            sources: HashMap::new(),
            default_source: SimSource::default(),
            policy: None,
            max_video_bitrate: None,
            write_fault: None,
            element_faults: HashMap::new(),
            every_element: ElementFault::default(),
            audio_fault: None,
        }
    }
}

impl SimRuntimeBuilder {
    /// Forget every supported container.
    pub fn clear_support(mut self) -> Self {
        self.support.clear();
        self
    }

    /// Support `essence` with the given codec prefixes.
    pub fn support(mut self, essence: &str, codecs: &[&str]) -> Self {
        self.support.insert(
            essence.to_ascii_lowercase(),
            codecs.iter().map(|c| c.to_ascii_lowercase()).collect(),
        );
        self
    }

    /// Remove support for a container.
    pub fn unsupport(mut self, essence: &str) -> Self {
        self.support.remove(&essence.to_ascii_lowercase());
        self
    }

    /// Recorders for `essence` accept audio tracks but write video only,
    /// like a container without an audio encoder.
    pub fn video_only(mut self, essence: &str) -> Self {
        self.video_only.insert(essence.to_ascii_lowercase());
        self
    }

    /// MIME type negotiated when no type is requested; `None` makes the
    /// platform default unavailable.
    pub fn default_mime(mut self, mime: Option<&str>) -> Self {
        self.default_mime = mime.map(str::to_string);
        self
    }

    /// Metadata for sources with this name.
    pub fn source(mut self, name: &str, source: SimSource) -> Self {
        self.sources.insert(name.to_string(), source);
        self
    }

    /// Metadata for sources without a registered name.
    pub fn default_source(mut self, source: SimSource) -> Self {
        self.default_source = source;
        self
    }

    /// Reject recorder options for which `policy` returns a reason.
    pub fn recorder_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(&RecorderOptions) -> Option<String> + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Reject video bitrate hints above `bps` as overconstrained.
    pub fn max_video_bitrate(mut self, bps: u64) -> Self {
        self.max_video_bitrate = Some(bps);
        self
    }

    /// The first `recorders` started recorders fail on the frame after
    /// `after_frames` frames were written.
    pub fn fail_writes(mut self, after_frames: u64, recorders: usize) -> Self {
        self.write_fault = Some(WriteFault {
            after_frames,
            recorders,
        });
        self
    }

    /// Faults for the element opened by the `index`-th load (zero-based).
    pub fn fault_element(mut self, index: usize, fault: ElementFault) -> Self {
        self.element_faults.insert(index, fault);
        self
    }

    /// Faults for every element without an index-specific entry.
    pub fn fault_every_element(mut self, fault: ElementFault) -> Self {
        self.every_element = fault;
        self
    }

    pub fn audio_fault(mut self, fault: AudioFault) -> Self {
        self.audio_fault = Some(fault);
        self
    }

    pub fn build(self) -> SimRuntime {
        SimRuntime {
            inner: Arc::new(SimInner {
                support: self.support,
                video_only: self.video_only,
                default_mime: self.default_mime,
                sources: self.sources,
                default_source: self.default_source,
                policy: self.policy,
                max_video_bitrate: self.max_video_bitrate,
                write_fault: self.write_fault,
                element_faults: self.element_faults,
                every_element: self.every_element,
                audio_fault: self.audio_fault,
                events: Mutex::new(Vec::new()),
                loads: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                live_elements: AtomicUsize::new(0),
                live_graphs: AtomicUsize::new(0),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SimRuntime
// ---------------------------------------------------------------------------

struct SimInner {
    support: HashMap<String, Vec<String>>,
    video_only: HashSet<String>,
    default_mime: Option<String>,
    sources: HashMap<String, SimSource>,
    default_source: SimSource,
    policy: Option<RecorderPolicy>,
    max_video_bitrate: Option<u64>,
    write_fault: Option<WriteFault>,
    element_faults: HashMap<usize, ElementFault>,
    every_element: ElementFault,
    audio_fault: Option<AudioFault>,
    events: Mutex<Vec<SimEvent>>,
    loads: AtomicUsize,
    started: AtomicUsize,
    live_elements: AtomicUsize,
    live_graphs: AtomicUsize,
}

impl SimInner {
    fn record(&self, event: SimEvent) {
        self.events.lock().push(event);
    }

    fn supports(&self, mime_type: &str) -> bool {
        let mime = MimeType::parse(mime_type);
        let Some(codecs) = self.support.get(&mime.essence) else {
            return false;
        };
        mime.codecs.iter().all(|c| {
            let c = c.to_ascii_lowercase();
            codecs.iter().any(|prefix| c.starts_with(prefix.as_str()))
        })
    }

    fn rejection(&self, options: &RecorderOptions) -> Option<String> {
        match &options.mime_type {
            Some(mime) if !self.supports(mime) => {
                return Some(format!("NotSupportedError: {mime}"));
            }
            None if self.default_mime.is_none() => {
                return Some("NotSupportedError: no default recorder".to_string());
            }
            _ => {}
        }
        if let (Some(max), Some(requested)) = (self.max_video_bitrate, options.video_bitrate_bps) {
            if requested > max {
                return Some(format!(
                    "OverconstrainedError: video bitrate {requested} exceeds {max}"
                ));
            }
        }
        self.policy.as_ref().and_then(|policy| policy(options))
    }

    fn records_audio(&self, mime_type: &str) -> bool {
        !self.video_only.contains(&MimeType::parse(mime_type).essence)
    }
}

/// Deterministic in-memory [`MediaRuntime`].
#[derive(Clone)]
pub struct SimRuntime {
    inner: Arc<SimInner>,
}

impl std::fmt::Debug for SimRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRuntime")
            .field("containers", &self.inner.support.keys().collect::<Vec<_>>())
            .field("default_mime", &self.inner.default_mime)
            .finish()
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimRuntime {
    /// A runtime supporting H.264/AAC MP4 and VP8/VP9/Opus WebM.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SimRuntimeBuilder {
        SimRuntimeBuilder::default()
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<SimEvent> {
        self.inner.events.lock().clone()
    }

    /// Every recorder construction attempt, in order.
    pub fn recorder_requests(&self) -> Vec<(RecorderOptions, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::RecorderRequested {
                    options, accepted, ..
                } => Some((options, accepted)),
                _ => None,
            })
            .collect()
    }

    /// Negotiated MIME types of started recorders, in order.
    pub fn started_recorders(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SimEvent::RecorderStarted { mime } => Some(mime),
                _ => None,
            })
            .collect()
    }

    /// Media elements not yet dropped.
    pub fn live_elements(&self) -> usize {
        self.inner.live_elements.load(Ordering::SeqCst)
    }

    /// Audio graphs not yet dropped.
    pub fn live_audio_graphs(&self) -> usize {
        self.inner.live_graphs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaRuntime for SimRuntime {
    fn name(&self) -> &str {
        "sim"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.inner.supports(mime_type)
    }

    async fn load(&self, source: &SourceMedia) -> Result<Box<dyn MediaElement>> {
        let index = self.inner.loads.fetch_add(1, Ordering::SeqCst);
        let fault = self
            .inner
            .element_faults
            .get(&index)
            .cloned()
            .unwrap_or_else(|| self.inner.every_element.clone());

        if let Some(load_fault) = &fault.load {
            load_fault.trigger("metadata load").await?;
        }

        let metadata = self
            .inner
            .sources
            .get(source.name())
            .unwrap_or(&self.inner.default_source)
            .metadata
            .clone();

        self.inner.record(SimEvent::Loaded {
            name: source.name().to_string(),
            index,
        });
        self.inner.live_elements.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(SimElement {
            inner: Arc::clone(&self.inner),
            metadata,
            time: 0.0,
            muted: false,
            volume: 1.0,
            ended: false,
            closed: false,
            fault,
        }))
    }

    fn create_recorder(
        &self,
        stream: &CaptureStream,
        options: &RecorderOptions,
    ) -> Result<Box<dyn Recorder>> {
        let rejection = self.inner.rejection(options);
        self.inner.record(SimEvent::RecorderRequested {
            options: options.clone(),
            accepted: rejection.is_none(),
            audio_tracks: stream.audio_tracks().len(),
        });
        if let Some(reason) = rejection {
            tracing::debug!(%reason, "recorder options rejected");
            return Err(Error::Recorder(reason));
        }

        let mime = options
            .mime_type
            .clone()
            .or_else(|| self.inner.default_mime.clone())
            .unwrap_or_default();
        let audio_tracks = if self.inner.records_audio(&mime) {
            stream.audio_tracks().len()
        } else {
            if stream.has_audio() {
                tracing::warn!(mime = %mime, "sim container is video-only; dropping audio");
            }
            0
        };

        Ok(Box::new(SimRecorder {
            inner: Arc::clone(&self.inner),
            mime,
            audio_tracks,
            width: stream.width(),
            height: stream.height(),
            frame_rate: stream.frame_rate(),
            video_bitrate_bps: options.video_bitrate_bps,
            state: RecorderState::Inactive,
            fail_after: None,
            frames: 0,
            previous: None,
            pending: Vec::new(),
            chunks: Vec::new(),
        }))
    }

    fn create_audio_graph(&self) -> Result<Box<dyn AudioGraph>> {
        if self.inner.audio_fault == Some(AudioFault::Unavailable) {
            return Err(Error::AudioAttach("audio graph unavailable".to_string()));
        }
        self.inner.live_graphs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimAudioGraph {
            inner: Arc::clone(&self.inner),
            element: None,
            closed: false,
        }))
    }
}

// ---------------------------------------------------------------------------
// Element
// ---------------------------------------------------------------------------

struct SimElement {
    inner: Arc<SimInner>,
    metadata: MediaMetadata,
    time: f64,
    muted: bool,
    volume: f64,
    ended: bool,
    closed: bool,
    fault: ElementFault,
}

/// Horizontal/vertical gradient whose blue channel moves with time.
fn gradient_frame(width: u32, height: u32, secs: f64) -> VideoFrame {
    let w = width.max(1);
    let h = height.max(1);
    let blue = ((secs.max(0.0) * 60.0) as u64 % 256) as u8;
    RgbaImage::from_fn(w, h, |x, y| {
        Rgba([
            (x * 255 / w) as u8,
            (y * 255 / h) as u8,
            blue,
            255,
        ])
    })
}

#[async_trait]
impl MediaElement for SimElement {
    fn metadata(&self) -> &MediaMetadata {
        &self.metadata
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn muted(&self) -> bool {
        self.muted
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn ended(&self) -> bool {
        self.ended
    }

    async fn seek(&mut self, secs: f64) -> Result<()> {
        if let Some(fault) = &self.fault.seek {
            fault.trigger("seek").await?;
        }
        let duration = self.metadata.duration_secs;
        self.time = secs.clamp(0.0, duration.max(0.0));
        self.ended = secs >= duration;
        self.inner.record(SimEvent::Seeked { secs: self.time });
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.inner.record(SimEvent::Played {
            muted: self.muted,
            volume: self.volume,
        });
        Ok(())
    }

    async fn decode_frame(&mut self) -> Result<VideoFrame> {
        if let Some(fault) = &self.fault.decode {
            fault.trigger("decode").await?;
        }
        if self.closed {
            return Err(Error::Media("element closed".to_string()));
        }
        Ok(gradient_frame(
            self.metadata.width,
            self.metadata.height,
            self.time,
        ))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.record(SimEvent::ElementClosed);
        }
    }
}

impl Drop for SimElement {
    fn drop(&mut self) {
        self.inner.live_elements.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

struct SimRecorder {
    inner: Arc<SimInner>,
    mime: String,
    audio_tracks: usize,
    width: u32,
    height: u32,
    frame_rate: u32,
    video_bitrate_bps: Option<u64>,
    state: RecorderState,
    fail_after: Option<u64>,
    frames: u64,
    previous: Option<VideoFrame>,
    pending: Vec<u8>,
    chunks: Vec<Bytes>,
}

impl SimRecorder {
    fn frame_bytes(&self) -> usize {
        let by_pixels = (self.width as u64 * self.height as u64 / 8).max(1);
        let cost = match self.video_bitrate_bps {
            Some(bps) => by_pixels.min((bps / 8 / self.frame_rate.max(1) as u64).max(1)),
            None => by_pixels,
        };
        cost as usize
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.chunks
                .push(Bytes::from(std::mem::take(&mut self.pending)));
        }
    }
}

#[async_trait]
impl Recorder for SimRecorder {
    fn mime_type(&self) -> &str {
        &self.mime
    }

    fn audio_tracks(&self) -> usize {
        self.audio_tracks
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Inactive {
            return Err(Error::Recorder(format!(
                "cannot start recorder in state {:?}",
                self.state
            )));
        }
        let ordinal = self.inner.started.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.inner.write_fault {
            if ordinal < fault.recorders {
                self.fail_after = Some(fault.after_frames);
            }
        }
        self.state = RecorderState::Recording;
        self.chunks
            .push(Bytes::from(format!("SIMREC:{}\n", self.mime)));
        self.inner.record(SimEvent::RecorderStarted {
            mime: self.mime.clone(),
        });
        Ok(())
    }

    async fn write_frame(&mut self, frame: &VideoFrame) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::Recorder(format!(
                "write in state {:?}",
                self.state
            )));
        }
        if frame.dimensions() != (self.width, self.height) {
            self.state = RecorderState::Failed;
            return Err(Error::Recorder(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        if self.fail_after.is_some_and(|n| self.frames >= n) {
            tracing::debug!(mime = %self.mime, frames = self.frames, "injecting write failure");
            self.state = RecorderState::Failed;
            return Err(Error::Recorder("simulated encoder failure".to_string()));
        }

        let held = self.previous.as_ref().is_some_and(|p| p == frame);
        let size = if held {
            HELD_FRAME_BYTES
        } else {
            self.frame_bytes()
        };
        self.pending.resize(self.pending.len() + size, 0);
        if !held {
            self.previous = Some(frame.clone());
        }
        self.frames += 1;
        if self.frames % CHUNK_FRAMES == 0 {
            self.flush();
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<Vec<Bytes>> {
        if self.state != RecorderState::Recording {
            return Err(Error::Recorder(format!(
                "stop in state {:?}",
                self.state
            )));
        }
        self.flush();
        self.state = RecorderState::Stopped;
        let chunks = std::mem::take(&mut self.chunks);
        self.inner.record(SimEvent::RecorderStopped {
            mime: self.mime.clone(),
            bytes: chunks.iter().map(Bytes::len).sum(),
            frames: self.frames,
        });
        Ok(chunks)
    }

    async fn abort(&mut self) {
        if matches!(self.state, RecorderState::Recording | RecorderState::Failed) {
            self.inner.record(SimEvent::RecorderAborted {
                mime: self.mime.clone(),
            });
        }
        self.chunks.clear();
        self.pending.clear();
        self.state = RecorderState::Stopped;
    }
}

// ---------------------------------------------------------------------------
// Audio graph
// ---------------------------------------------------------------------------

struct SimAudioGraph {
    inner: Arc<SimInner>,
    element: Option<Box<dyn MediaElement>>,
    closed: bool,
}

#[async_trait]
impl AudioGraph for SimAudioGraph {
    async fn resume(&mut self) -> Result<()> {
        if self.inner.audio_fault == Some(AudioFault::NeverResumes) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn connect(&mut self, element: Box<dyn MediaElement>) -> Result<Vec<AudioTrack>> {
        match self.inner.audio_fault {
            Some(AudioFault::DecodeHangs) => std::future::pending::<()>().await,
            Some(AudioFault::NoTracks) => {
                self.element = Some(element);
                self.inner.record(SimEvent::AudioConnected { tracks: 0 });
                return Ok(Vec::new());
            }
            _ => {}
        }

        let tracks: Vec<AudioTrack> = element
            .metadata()
            .audio_streams
            .iter()
            .map(|s| AudioTrack {
                label: format!("sim-audio-{}", s.index),
                channels: s.channels,
                sample_rate: s.sample_rate.unwrap_or(48_000),
                origin: TrackOrigin::Synthetic,
            })
            .collect();
        self.element = Some(element);
        self.inner.record(SimEvent::AudioConnected {
            tracks: tracks.len(),
        });
        Ok(tracks)
    }

    async fn close(&mut self) {
        if let Some(mut element) = self.element.take() {
            element.close().await;
        }
        if !self.closed {
            self.closed = true;
            self.inner.record(SimEvent::GraphClosed);
        }
    }
}

impl Drop for SimAudioGraph {
    fn drop(&mut self) {
        self.inner.live_graphs.fetch_sub(1, Ordering::SeqCst);
    }
}
