//! Editor focus signals used to boost task priority
//!
//! The host editor owns the real notion of which documents are open; the
//! scheduler only asks through [`EditorContext`].

use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub trait EditorContext: Send + Sync {
    /// The document that currently has keyboard focus
    fn active_file(&self) -> Option<PathBuf>;

    /// Documents visible in any editor pane
    fn visible_files(&self) -> Vec<PathBuf>;

    /// Size in bytes, `None` when unknown
    fn file_size(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    fn is_active(&self, path: &Path) -> bool {
        self.active_file().as_deref() == Some(path)
    }

    fn is_visible(&self, path: &Path) -> bool {
        self.visible_files().iter().any(|p| p == path)
    }
}

/// In-memory editor state, updated by whoever observes the real editor
#[derive(Debug, Default)]
pub struct EditorState {
    active: RwLock<Option<PathBuf>>,
    visible: RwLock<HashSet<PathBuf>>,
}

impl EditorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, path: Option<PathBuf>) {
        *self.active.write() = path;
    }

    pub fn set_visible(&self, paths: impl IntoIterator<Item = PathBuf>) {
        *self.visible.write() = paths.into_iter().collect();
    }

    pub fn open(&self, path: impl Into<PathBuf>) {
        self.visible.write().insert(path.into());
    }

    pub fn close(&self, path: &Path) {
        self.visible.write().remove(path);
        let mut active = self.active.write();
        if active.as_deref() == Some(path) {
            *active = None;
        }
    }
}

impl EditorContext for EditorState {
    fn active_file(&self) -> Option<PathBuf> {
        self.active.read().clone()
    }

    fn visible_files(&self) -> Vec<PathBuf> {
        self.visible.read().iter().cloned().collect()
    }

    fn is_visible(&self, path: &Path) -> bool {
        self.visible.read().contains(path)
    }
}

/// Context for headless runs: nothing is ever focused
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl EditorContext for Headless {
    fn active_file(&self) -> Option<PathBuf> {
        None
    }

    fn visible_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}
