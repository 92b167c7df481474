//! Diagnostic dump of sampled point sets.
//!
//! A [`SampleSink`] receives the coordinates of every pyramid level for
//! each frame after a successful forward pass. Nothing in the numeric path
//! depends on it.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{NeuralCascadeError, Result};

/// Receives per-frame sampled coordinates.
pub trait SampleSink {
    /// Record one frame: `levels[l]` holds the points of pyramid level `l`.
    fn record(&self, frame_id: &str, levels: &[Vec<[f32; 3]>]) -> Result<()>;
}

#[derive(Serialize)]
struct SampleList<'a> {
    frame_id: &'a str,
    levels: &'a [Vec<[f32; 3]>],
}

/// Writes one JSON file per frame under `<root>/sample_list_save/`.
///
/// A frame id of the form `sequence/frame` lands in a `sequence/`
/// subdirectory as `sample_list_<frame>.json`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Create a sink writing below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output directory.
    pub fn directory(&self) -> PathBuf {
        self.root.join("sample_list_save")
    }

    /// File written for `frame_id`.
    pub fn path_for(&self, frame_id: &str) -> PathBuf {
        let dir = self.directory();
        match frame_id.split_once('/') {
            Some((sequence, frame)) => dir
                .join(sequence)
                .join(format!("sample_list_{}.json", frame)),
            None => dir.join(format!("sample_list_{}.json", frame_id)),
        }
    }
}

fn sink_error(path: &Path, err: impl std::fmt::Display) -> NeuralCascadeError {
    NeuralCascadeError::SinkError {
        message: format!("{}: {}", path.display(), err),
    }
}

impl SampleSink for DirectorySink {
    fn record(&self, frame_id: &str, levels: &[Vec<[f32; 3]>]) -> Result<()> {
        let path = self.path_for(frame_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, &SampleList { frame_id, levels })
            .map_err(|err| sink_error(&path, err))?;

        log::info!(
            "saved {} sampled levels for frame {} to {}",
            levels.len(),
            frame_id,
            path.display()
        );
        Ok(())
    }
}
