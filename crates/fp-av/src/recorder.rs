//! Recording through a piped ffmpeg encoder.
//!
//! Raw RGBA frames go to ffmpeg's stdin; the muxed container comes back on
//! stdout and is drained into chunks by a background task while frames are
//! still being written. Audio tracks are read by ffmpeg directly from the
//! source file they originate from.

use std::path::PathBuf;
use std::process::ExitStatus;

use async_trait::async_trait;
use bytes::Bytes;
use fp_core::{ContainerFamily, Error};
use fp_media::{AudioTrack, CaptureStream, Recorder, RecorderState, TrackOrigin, VideoFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::capabilities::EncoderChoice;
use crate::command::ToolCommand;

/// Read size for the stdout drain; each read becomes one chunk.
const CHUNK_SIZE: usize = 64 * 1024;

fn strs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Everything needed to build the encoder command line.
#[derive(Debug, Clone)]
pub struct EncoderSpec {
    pub mime_type: String,
    pub choice: EncoderChoice,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio_tracks: Vec<AudioTrack>,
    pub video_bitrate_bps: Option<u64>,
    pub audio_bitrate_bps: Option<u64>,
}

impl EncoderSpec {
    pub fn new(
        mime_type: String,
        choice: EncoderChoice,
        stream: &CaptureStream,
        video_bitrate_bps: Option<u64>,
        audio_bitrate_bps: Option<u64>,
    ) -> Self {
        let audio_tracks = if choice.audio_encoder.is_some() {
            stream
                .audio_tracks()
                .iter()
                .filter(|t| matches!(t.origin, TrackOrigin::File { .. }))
                .cloned()
                .collect()
        } else {
            if stream.has_audio() {
                tracing::warn!(mime = %mime_type, "no audio encoder for container; recording video only");
            }
            Vec::new()
        };
        Self {
            mime_type,
            choice,
            width: stream.width(),
            height: stream.height(),
            frame_rate: stream.frame_rate(),
            audio_tracks,
            video_bitrate_bps,
            audio_bitrate_bps,
        }
    }

    /// ffmpeg arguments for this recording.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-r".into(),
            self.frame_rate.to_string(),
            "-i".into(),
            "pipe:0".into(),
        ];

        // One extra input per distinct audio file.
        let mut inputs: Vec<&PathBuf> = Vec::new();
        let mut maps = Vec::new();
        for track in &self.audio_tracks {
            if let TrackOrigin::File { path, stream_index } = &track.origin {
                let input = match inputs.iter().position(|p| *p == path) {
                    Some(i) => i,
                    None => {
                        inputs.push(path);
                        inputs.len() - 1
                    }
                };
                maps.push(format!("{}:{}", input + 1, stream_index));
            }
        }
        for path in &inputs {
            args.push("-i".into());
            args.push(path.to_string_lossy().to_string());
        }

        args.extend(strs(&["-map", "0:v:0"]));
        for m in &maps {
            args.extend(["-map".into(), m.clone()]);
        }

        args.extend([
            "-vf".into(),
            "pad=ceil(iw/2)*2:ceil(ih/2)*2".into(),
            "-c:v".into(),
            self.choice.video_encoder.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
        args.extend(self.video_rate_args());

        if !maps.is_empty() {
            if let Some(enc) = &self.choice.audio_encoder {
                args.extend(["-c:a".into(), enc.clone()]);
                if let Some(bps) = self.audio_bitrate_bps {
                    args.extend(["-b:a".into(), bps.to_string()]);
                }
                args.push("-shortest".into());
            }
        }

        match self.choice.family {
            ContainerFamily::Mp4 => args.extend(strs(&[
                "-movflags",
                "frag_keyframe+empty_moov+default_base_moof",
            ])),
            ContainerFamily::WebM => {}
        }
        args.extend(["-f".into(), self.choice.muxer.to_string(), "pipe:1".into()]);
        args
    }

    fn video_rate_args(&self) -> Vec<String> {
        let enc = self.choice.video_encoder.as_str();
        let mut out = match enc {
            "libx264" => strs(&["-preset", "veryfast"]),
            "libvpx" | "libvpx-vp9" => strs(&["-deadline", "realtime", "-cpu-used", "8"]),
            _ => Vec::new(),
        };
        match (self.video_bitrate_bps, enc) {
            (Some(bps), _) => out.extend(["-b:v".into(), bps.to_string()]),
            (None, "libx264") => out.extend(strs(&["-crf", "23"])),
            (None, "libvpx-vp9") => out.extend(strs(&["-crf", "33", "-b:v", "0"])),
            (None, "libvpx") => out.extend(strs(&["-b:v", "1M"])),
            (None, _) => {}
        }
        out
    }
}

struct Running {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout_task: JoinHandle<std::io::Result<Vec<Bytes>>>,
    stderr_task: JoinHandle<String>,
}

/// A [`Recorder`] backed by an ffmpeg child process.
pub struct FfmpegRecorder {
    ffmpeg: PathBuf,
    spec: EncoderSpec,
    state: RecorderState,
    running: Option<Running>,
}

impl FfmpegRecorder {
    pub fn new(ffmpeg: PathBuf, spec: EncoderSpec) -> Self {
        Self {
            ffmpeg,
            spec,
            state: RecorderState::Inactive,
            running: None,
        }
    }

    pub fn spec(&self) -> &EncoderSpec {
        &self.spec
    }

    fn fail(&mut self, message: String) -> Error {
        self.state = RecorderState::Failed;
        Error::Recorder(message)
    }
}

fn status_error(status: ExitStatus, stderr: &str) -> String {
    let tail = stderr.trim();
    if tail.is_empty() {
        format!("ffmpeg exited with {status}")
    } else {
        format!("ffmpeg exited with {status}: {tail}")
    }
}

#[async_trait]
impl Recorder for FfmpegRecorder {
    fn mime_type(&self) -> &str {
        &self.spec.mime_type
    }

    fn audio_tracks(&self) -> usize {
        self.spec.audio_tracks.len()
    }

    fn state(&self) -> RecorderState {
        self.state
    }

    async fn start(&mut self) -> fp_core::Result<()> {
        if self.state != RecorderState::Inactive {
            return Err(Error::Recorder(format!("cannot start in state {:?}", self.state)));
        }
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(self.spec.args());
        let mut child = match cmd.spawn_piped() {
            Ok(child) => child,
            Err(e) => return Err(self.fail(e.to_string())),
        };

        let (Some(stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(self.fail("encoder stdio not captured".to_string()));
        };

        let stdout_task = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                chunks.push(Bytes::copy_from_slice(&buf[..n]));
            }
            Ok(chunks)
        });
        let stderr_task = tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        });

        tracing::debug!(
            mime = %self.spec.mime_type,
            encoder = %self.spec.choice.video_encoder,
            size = %format!("{}x{}", self.spec.width, self.spec.height),
            fps = self.spec.frame_rate,
            audio_tracks = self.spec.audio_tracks.len(),
            "encoder started"
        );

        self.running = Some(Running {
            child,
            stdin: Some(stdin),
            stdout_task,
            stderr_task,
        });
        self.state = RecorderState::Recording;
        Ok(())
    }

    async fn write_frame(&mut self, frame: &VideoFrame) -> fp_core::Result<()> {
        if self.state != RecorderState::Recording {
            return Err(Error::Recorder(format!("write in state {:?}", self.state)));
        }
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            let msg = format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            );
            return Err(self.fail(msg));
        }
        let stdin = self.running.as_mut().and_then(|r| r.stdin.as_mut());
        let Some(stdin) = stdin else {
            return Err(self.fail("encoder stdin closed".to_string()));
        };
        if let Err(e) = stdin.write_all(frame.as_raw()).await {
            return Err(self.fail(format!("encoder pipe closed: {e}")));
        }
        Ok(())
    }

    async fn stop(&mut self) -> fp_core::Result<Vec<Bytes>> {
        if self.state != RecorderState::Recording {
            return Err(Error::Recorder(format!("stop in state {:?}", self.state)));
        }
        let Some(mut running) = self.running.take() else {
            return Err(self.fail("encoder not running".to_string()));
        };

        // Closing stdin signals end of input.
        if let Some(mut stdin) = running.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        let status = match running.child.wait().await {
            Ok(status) => status,
            Err(e) => return Err(self.fail(format!("waiting for encoder: {e}"))),
        };
        let stderr = running.stderr_task.await.unwrap_or_default();
        let chunks = match running.stdout_task.await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => return Err(self.fail(format!("reading encoder output: {e}"))),
            Err(e) => return Err(self.fail(format!("output task failed: {e}"))),
        };

        if !status.success() {
            return Err(self.fail(status_error(status, &stderr)));
        }
        self.state = RecorderState::Stopped;
        tracing::debug!(
            chunks = chunks.len(),
            bytes = chunks.iter().map(Bytes::len).sum::<usize>(),
            "encoder finished"
        );
        Ok(chunks)
    }

    async fn abort(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.stdin.take());
            let _ = running.child.start_kill();
            let _ = running.child.wait().await;
            running.stdout_task.abort();
            running.stderr_task.abort();
        }
        self.state = RecorderState::Stopped;
    }
}
