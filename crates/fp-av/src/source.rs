//! Frame decoding through a piped ffmpeg process.
//!
//! [`FfmpegElement`] keeps one decoder process alive and reads raw RGBA
//! frames from its stdout at the source's native rate. Forward seeks within
//! a short window are served by reading ahead; anything else respawns the
//! decoder at the new position with `-ss`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fp_core::{Error, MediaMetadata};
use fp_media::{MediaElement, VideoFrame};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

use crate::command::ToolCommand;

/// Forward distance (seconds) served by reading ahead instead of respawning.
const READ_AHEAD_WINDOW: f64 = 2.0;

const DEFAULT_FPS: f64 = 30.0;

struct Decoder {
    child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<()>,
    /// Timestamp of the next frame the pipe will yield.
    next_pts: f64,
}

/// A source opened for decoding by ffmpeg.
pub struct FfmpegElement {
    ffmpeg: PathBuf,
    input: PathBuf,
    metadata: MediaMetadata,
    fps: f64,
    time: f64,
    muted: bool,
    volume: f64,
    ended: bool,
    decoder: Option<Decoder>,
    last_frame: Option<(f64, VideoFrame)>,
}

impl FfmpegElement {
    pub fn new(ffmpeg: PathBuf, input: PathBuf, metadata: MediaMetadata) -> Self {
        let fps = metadata
            .frame_rate
            .filter(|r| *r > 0.0)
            .unwrap_or(DEFAULT_FPS);
        Self {
            ffmpeg,
            input,
            metadata,
            fps,
            time: 0.0,
            muted: false,
            volume: 1.0,
            ended: false,
            decoder: None,
            last_frame: None,
        }
    }

    fn frame_len(&self) -> usize {
        self.metadata.width as usize * self.metadata.height as usize * 4
    }

    fn decoder_args(&self, start: f64) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            format!("{start:.3}"),
            "-i".into(),
            self.input.to_string_lossy().to_string(),
            "-map".into(),
            "0:v:0".into(),
            "-an".into(),
            "-sn".into(),
            "-r".into(),
            format!("{}", self.fps),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgba".into(),
            "pipe:1".into(),
        ]
    }

    async fn spawn_at(&mut self, start: f64) -> fp_core::Result<()> {
        self.stop_decoder().await;
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(self.decoder_args(start));
        let mut child = cmd.spawn_piped()?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(Error::tool("ffmpeg", "decoder stdio not captured"));
        };
        // Decoders never read stdin.
        drop(child.stdin.take());
        tracing::trace!(input = %self.input.display(), start, "decoder spawned");
        self.decoder = Some(Decoder {
            child,
            stdout,
            stderr_task: drain_stderr(stderr),
            next_pts: start,
        });
        Ok(())
    }

    async fn stop_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            let _ = decoder.child.start_kill();
            let _ = decoder.child.wait().await;
            decoder.stderr_task.abort();
        }
    }

    /// Read one frame; `Ok(None)` at end of stream.
    async fn read_frame(&mut self) -> fp_core::Result<Option<(f64, VideoFrame)>> {
        let len = self.frame_len();
        let (width, height) = (self.metadata.width, self.metadata.height);
        let step = 1.0 / self.fps;
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; len];
        match decoder.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Media(format!("decoder read failed: {e}"))),
        }
        let pts = decoder.next_pts;
        decoder.next_pts += step;

        let frame = VideoFrame::from_raw(width, height, buf)
            .ok_or_else(|| Error::Media("decoded frame has the wrong size".to_string()))?;
        Ok(Some((pts, frame)))
    }

    fn needs_respawn(&self, target: f64) -> bool {
        match &self.decoder {
            None => true,
            Some(d) => {
                let behind = self.last_frame.as_ref().map_or(d.next_pts, |(pts, _)| *pts);
                target + 1e-6 < behind || target - d.next_pts > READ_AHEAD_WINDOW
            }
        }
    }

    /// The input file this element decodes.
    pub fn input(&self) -> &Path {
        &self.input
    }
}

/// Read decoder diagnostics as they arrive so a chatty ffmpeg never blocks
/// on a full stderr pipe.
fn drain_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => tracing::debug!(
                    "decoder: {}",
                    String::from_utf8_lossy(&line).trim_end()
                ),
            }
        }
    })
}

#[async_trait]
impl MediaElement for FfmpegElement {
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

    fn source_path(&self) -> Option<&Path> {
        Some(&self.input)
    }

    async fn seek(&mut self, secs: f64) -> fp_core::Result<()> {
        let duration = self.metadata.duration_secs;
        self.time = secs.clamp(0.0, duration.max(0.0));
        self.ended = secs >= duration;
        Ok(())
    }

    async fn play(&mut self) -> fp_core::Result<()> {
        // Decoding is pull-based; audio is never rendered locally.
        tracing::trace!(muted = self.muted, volume = self.volume, "play");
        Ok(())
    }

    async fn decode_frame(&mut self) -> fp_core::Result<VideoFrame> {
        let target = self.time;
        let step = 1.0 / self.fps;

        if let Some((pts, frame)) = &self.last_frame {
            if (*pts..*pts + step).contains(&target) {
                return Ok(frame.clone());
            }
        }

        if self.needs_respawn(target) {
            self.last_frame = None;
            self.spawn_at(target).await?;
        }

        loop {
            match self.read_frame().await? {
                Some((pts, frame)) => {
                    let done = pts + step > target;
                    self.last_frame = Some((pts, frame));
                    if done {
                        break;
                    }
                }
                None => {
                    self.ended = true;
                    self.stop_decoder().await;
                    break;
                }
            }
        }

        self.last_frame
            .as_ref()
            .map(|(_, f)| f.clone())
            .ok_or_else(|| Error::Media(format!("no frame decoded at {target:.3}s")))
    }

    async fn close(&mut self) {
        self.stop_decoder().await;
        self.last_frame = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> FfmpegElement {
        FfmpegElement::new(
            PathBuf::from("ffmpeg"),
            PathBuf::from("/media/in.mp4"),
            MediaMetadata {
                duration_secs: 10.0,
                width: 64,
                height: 36,
                frame_rate: Some(25.0),
                audio_streams: vec![],
            },
        )
    }

    #[test]
    fn decoder_args_seek_and_rate() {
        let el = element();
        let args = el.decoder_args(1.5);
        let pos = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[pos + 1], "1.500");
        let pos = args.iter().position(|a| a == "-r").unwrap();
        assert_eq!(args[pos + 1], "25");
        assert_eq!(args.last().unwrap(), "pipe:1");
        assert!(args.contains(&"rgba".to_string()));
    }

    #[test]
    fn frame_len_is_rgba() {
        assert_eq!(element().frame_len(), 64 * 36 * 4);
    }

    #[tokio::test]
    async fn seek_clamps_and_marks_end() {
        let mut el = element();
        el.seek(4.0).await.unwrap();
        assert_eq!(el.current_time(), 4.0);
        assert!(!el.ended());
        el.seek(12.0).await.unwrap();
        assert_eq!(el.current_time(), 10.0);
        assert!(el.ended());
    }

    #[test]
    fn without_decoder_always_respawns() {
        assert!(element().needs_respawn(0.0));
    }

    /// A stand-in decoder that floods stderr before writing one 4x4 frame.
    #[cfg(unix)]
    fn noisy_decoder(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("noisy-ffmpeg");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             yes 'error while decoding MB 12 7, bytestream -5' | head -n 20000 >&2\n\
             head -c 64 /dev/zero\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn noisy_stderr_does_not_stall_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let mut el = FfmpegElement::new(
            noisy_decoder(dir.path()),
            PathBuf::from("/media/in.mp4"),
            MediaMetadata {
                duration_secs: 1.0,
                width: 4,
                height: 4,
                frame_rate: Some(25.0),
                audio_streams: vec![],
            },
        );

        let frame = tokio::time::timeout(std::time::Duration::from_secs(20), el.decode_frame())
            .await
            .expect("decoder stalled on stderr")
            .unwrap();
        assert_eq!(frame.dimensions(), (4, 4));
        el.close().await;
    }

    #[test]
    fn volume_is_clamped() {
        let mut el = element();
        el.set_volume(3.0);
        assert_eq!(el.volume(), 1.0);
        el.set_volume(-1.0);
        assert_eq!(el.volume(), 0.0);
    }
}
