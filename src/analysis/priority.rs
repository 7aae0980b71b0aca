//! Priority computation for newly queued tasks

use super::focus::EditorContext;
use super::task::TaskKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Weights combined into a task's absolute priority:
/// `base + kind weight + focus bonus + small-file bonus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    #[serde(default = "default_focused")]
    pub focused_bonus: i64,

    #[serde(default = "default_visible")]
    pub visible_bonus: i64,

    #[serde(default = "default_small_file")]
    pub small_file_bonus: i64,

    /// Files strictly below this many bytes get the small-file bonus
    #[serde(default = "default_threshold")]
    pub small_file_threshold: u64,

    #[serde(default = "default_model")]
    pub model: i64,

    #[serde(default = "default_route")]
    pub route: i64,

    #[serde(default = "default_view")]
    pub view: i64,

    #[serde(default = "default_template")]
    pub template: i64,

    /// Boost applied when an edited file is still waiting in the backlog
    #[serde(default = "default_change_boost")]
    pub change_boost: i64,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            focused_bonus: 100,
            visible_bonus: 50,
            small_file_bonus: 10,
            small_file_threshold: 10_000,
            model: 30,
            route: 20,
            view: 10,
            template: 5,
            change_boost: 100,
        }
    }
}

fn default_focused() -> i64 { 100 }
fn default_visible() -> i64 { 50 }
fn default_small_file() -> i64 { 10 }
fn default_threshold() -> u64 { 10_000 }
fn default_model() -> i64 { 30 }
fn default_route() -> i64 { 20 }
fn default_view() -> i64 { 10 }
fn default_template() -> i64 { 5 }
fn default_change_boost() -> i64 { 100 }

impl PriorityPolicy {
    pub fn kind_weight(&self, kind: TaskKind) -> i64 {
        match kind {
            TaskKind::Model => self.model,
            TaskKind::Route => self.route,
            TaskKind::View => self.view,
            TaskKind::Template => self.template,
        }
    }

    /// Focus bonuses are exclusive: the focused document does not also
    /// collect the visible bonus.
    pub fn focus_bonus(&self, path: &Path, editor: &dyn EditorContext) -> i64 {
        if editor.is_active(path) {
            self.focused_bonus
        } else if editor.is_visible(path) {
            self.visible_bonus
        } else {
            0
        }
    }

    /// Unknown sizes (stat failures) earn nothing
    pub fn size_bonus(&self, path: &Path, editor: &dyn EditorContext) -> i64 {
        match editor.file_size(path) {
            Some(size) if size < self.small_file_threshold => self.small_file_bonus,
            _ => 0,
        }
    }

    pub fn compute(&self, path: &Path, kind: TaskKind, base: i64, editor: &dyn EditorContext) -> i64 {
        base + self.kind_weight(kind) + self.focus_bonus(path, editor) + self.size_bonus(path, editor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::focus::{EditorState, Headless};
    use std::path::PathBuf;

    #[test]
    fn test_kind_ordering() {
        let policy = PriorityPolicy::default();
        let weights: Vec<i64> = TaskKind::ALL.iter().map(|k| policy.kind_weight(*k)).collect();
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_focus_bonus_is_exclusive() {
        let policy = PriorityPolicy::default();
        let editor = EditorState::new();
        let active = PathBuf::from("shop/models.py");
        let open = PathBuf::from("shop/urls.py");
        editor.set_visible(vec![active.clone(), open.clone()]);
        editor.set_active(Some(active.clone()));

        assert_eq!(policy.focus_bonus(&active, &editor), 100);
        assert_eq!(policy.focus_bonus(&open, &editor), 50);
        assert_eq!(policy.focus_bonus(Path::new("shop/views.py"), &editor), 0);
    }

    #[test]
    fn test_small_file_bonus() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("models.py");
        let large = dir.path().join("views.py");
        std::fs::write(&small, "class A: pass\n").unwrap();
        std::fs::write(&large, "x".repeat(20_000)).unwrap();

        let policy = PriorityPolicy::default();
        assert_eq!(policy.compute(&small, TaskKind::Model, 50, &Headless), 50 + 30 + 10);
        assert_eq!(policy.compute(&large, TaskKind::View, 30, &Headless), 30 + 10);
        assert_eq!(policy.compute(&dir.path().join("gone.py"), TaskKind::Route, 0, &Headless), 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let policy: PriorityPolicy = toml::from_str("model = 99").unwrap();
        assert_eq!(policy.model, 99);
        assert_eq!(policy.route, 20);
        assert_eq!(policy.focused_bonus, 100);
    }
}
