use crate::logs::SharedLogSink;
use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Directory of exported log transcripts.
#[derive(Clone)]
pub struct TranscriptStore {
    root: PathBuf,
}

impl TranscriptStore {
    pub fn new(root: PathBuf) -> Self {
        fs::create_dir_all(&root).ok();
        Self { root }
    }

    /// `<data_dir>/gatedeck/transcripts`, or a temp directory if the platform has none.
    pub fn default_location() -> Self {
        match ProjectDirs::from("", "", "gatedeck") {
            Some(dirs) => Self::new(dirs.data_dir().join("transcripts")),
            None => Self::in_memory(),
        }
    }

    pub fn in_memory() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("gatedeck-{}", Uuid::new_v4()));
        Self::new(path)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes the currently visible entries to a fresh timestamped file.
    pub fn save(&self, sink: &SharedLogSink) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let path = self.root.join(format!("transcript-{stamp}.log"));
        self.save_as(sink, &path)?;
        Ok(path)
    }

    pub fn save_as(&self, sink: &SharedLogSink, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, sink.export_visible())
            .with_context(|| format!("failed to write transcript {}", path.display()))?;
        Ok(())
    }

    /// Saved transcripts, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut transcripts: Vec<PathBuf> = walkdir::WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().and_then(|ext| ext.to_str()) == Some("log")
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("transcript-"))
            })
            .collect();
        transcripts.sort();
        Ok(transcripts)
    }
}
