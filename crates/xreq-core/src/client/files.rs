//! File inputs referenced by a request's `files` field.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub content: Vec<u8>,
}

/// Resolves a file-input id to the files selected in it.
pub trait FileSource: Send + Sync {
    /// `Ok(None)` when no input with this id exists; an empty vec when it
    /// exists but nothing is selected.
    fn selected(&self, input_id: &str) -> Result<Option<Vec<SelectedFile>>>;
}

/// A page without file inputs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFiles;

impl FileSource for NoFiles {
    fn selected(&self, _input_id: &str) -> Result<Option<Vec<SelectedFile>>> {
        Ok(None)
    }
}

/// Inputs held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryFiles {
    inputs: HashMap<String, Vec<SelectedFile>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input_id: impl Into<String>, files: Vec<SelectedFile>) -> Self {
        self.inputs.insert(input_id.into(), files);
        self
    }
}

impl FileSource for MemoryFiles {
    fn selected(&self, input_id: &str) -> Result<Option<Vec<SelectedFile>>> {
        Ok(self.inputs.get(input_id).cloned())
    }
}

/// Inputs backed by files on disk, read when the request is built.
#[derive(Debug, Default, Clone)]
pub struct PathFiles {
    inputs: HashMap<String, PathBuf>,
}

impl PathFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, input_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.inputs.insert(input_id.into(), path.into());
    }
}

impl FileSource for PathFiles {
    fn selected(&self, input_id: &str) -> Result<Option<Vec<SelectedFile>>> {
        let Some(path) = self.inputs.get(input_id) else {
            return Ok(None);
        };
        let content =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input_id.to_string());
        Ok(Some(vec![SelectedFile {
            name,
            content_type: None,
            content,
        }]))
    }
}
