//! Joins the source's audio onto a capture stream.

use std::time::Duration;

use fp_core::config::CompressionConfig;
use fp_core::{Error, SourceMedia};
use fp_media::{AudioGraph, CaptureStream, MediaRuntime};

/// Bounded waits for the audio join.
#[derive(Debug, Clone, Copy)]
pub struct AudioTimeouts {
    pub metadata: Duration,
    /// Applies to graph resume and to connecting the element.
    pub graph: Duration,
}

impl From<&CompressionConfig> for AudioTimeouts {
    fn from(config: &CompressionConfig) -> Self {
        Self {
            metadata: config.metadata_timeout(),
            graph: config.audio_timeout(),
        }
    }
}

impl Default for AudioTimeouts {
    fn default() -> Self {
        Self::from(&CompressionConfig::default())
    }
}

/// Outcome of [`attach_audio`].
///
/// The graph, when present, belongs to the encoding session and must be
/// closed with it.
pub struct AudioAttachment {
    pub graph: Option<Box<dyn AudioGraph>>,
    pub tracks_added: usize,
    /// Why nothing was attached.
    pub failure: Option<String>,
}

impl AudioAttachment {
    pub fn attached(&self) -> bool {
        self.tracks_added > 0
    }
}

impl std::fmt::Debug for AudioAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioAttachment")
            .field("graph", &self.graph.is_some())
            .field("tracks_added", &self.tracks_added)
            .field("failure", &self.failure)
            .finish()
    }
}

/// Decode `source`'s audio and add its tracks to `stream`.
///
/// Never fails. Any problem (graph unavailable, resume or connect timing
/// out, no tracks produced) is logged as a warning, the graph is closed and
/// `stream` is left untouched.
pub async fn attach_audio(
    runtime: &dyn MediaRuntime,
    stream: &mut CaptureStream,
    source: &SourceMedia,
    timeouts: AudioTimeouts,
) -> AudioAttachment {
    let mut graph = None;
    match join(runtime, stream, source, timeouts, &mut graph).await {
        Ok(tracks_added) => {
            tracing::debug!(source = source.name(), tracks_added, "audio attached");
            AudioAttachment {
                graph,
                tracks_added,
                failure: None,
            }
        }
        Err(e) => {
            let err = match e {
                Error::AudioAttach(_) => e,
                other => Error::AudioAttach(other.to_string()),
            };
            tracing::warn!(source = source.name(), "{err}; continuing without audio");
            if let Some(mut graph) = graph.take() {
                graph.close().await;
            }
            AudioAttachment {
                graph: None,
                tracks_added: 0,
                failure: Some(err.to_string()),
            }
        }
    }
}

async fn join(
    runtime: &dyn MediaRuntime,
    stream: &mut CaptureStream,
    source: &SourceMedia,
    timeouts: AudioTimeouts,
    slot: &mut Option<Box<dyn AudioGraph>>,
) -> fp_core::Result<usize> {
    let mut element = tokio::time::timeout(timeouts.metadata, runtime.load(source))
        .await
        .map_err(|_| Error::timeout("audio source metadata", timeouts.metadata))??;
    element.set_muted(true);
    element.set_volume(0.0);

    let graph = match runtime.create_audio_graph() {
        Ok(graph) => slot.insert(graph),
        Err(e) => {
            element.close().await;
            return Err(e);
        }
    };

    match tokio::time::timeout(timeouts.graph, graph.resume()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            element.close().await;
            return Err(e);
        }
        Err(_) => {
            element.close().await;
            return Err(Error::timeout("audio graph resume", timeouts.graph));
        }
    }

    let tracks = tokio::time::timeout(timeouts.graph, graph.connect(element))
        .await
        .map_err(|_| Error::timeout("audio decode", timeouts.graph))??;
    if tracks.is_empty() {
        return Err(Error::AudioAttach("source produced no audio tracks".to_string()));
    }

    let added = tracks.len();
    for track in tracks {
        stream.add_track(track);
    }
    Ok(added)
}
