use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_proto::FramePayload;
use serde_json::json;

use crate::error::SenderError;

/// Produces the text payload for the next outgoing frame.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<String, SenderError>;
}

/// Wraps base64 frame data the way the hub unwraps it.
fn frame_envelope(payload: FramePayload) -> String {
    json!({ "frame": payload.into_inner() }).to_string()
}

/// Cycles through the files of a directory in name order.
#[derive(Debug)]
pub struct DirectorySource {
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl DirectorySource {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, SenderError> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut frames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                frames.push(entry.path());
            }
        }
        if frames.is_empty() {
            return Err(SenderError::EmptyFrameDir(dir.to_path_buf()));
        }
        frames.sort();
        Ok(Self { frames, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl FrameSource for DirectorySource {
    async fn next_frame(&mut self) -> Result<String, SenderError> {
        let path = &self.frames[self.cursor];
        let bytes = tokio::fs::read(path).await?;
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(frame_envelope(FramePayload::from_binary(&bytes)))
    }
}

/// Synthetic numbered frames for running without a camera.
#[derive(Debug)]
pub struct TestPatternSource {
    camera_id: String,
    sequence: u64,
}

impl TestPatternSource {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            sequence: 0,
        }
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn next_frame(&mut self) -> Result<String, SenderError> {
        let pattern = format!("{}#{}", self.camera_id, self.sequence);
        self.sequence += 1;
        Ok(frame_envelope(FramePayload::from_binary(pattern.as_bytes())))
    }
}
