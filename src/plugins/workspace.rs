//! 沙箱源码工作区
//!
//! Workspace 绑定 source_root，所有路径经 resolve 校验必须在根目录下（禁止 ../ 逃逸）；
//! edit 做精确字符串替换，找不到时退回缩进容忍匹配；每次编辑返回 EditReceipt，可据此还原。

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("path escapes source root: {0}")]
    PathEscape(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("file too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("old_string not found in {0}")]
    NoMatch(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 一次成功编辑的回执（保存原文，用于失败时还原）
#[derive(Debug, Clone)]
pub struct EditReceipt {
    pub path: PathBuf,
    pub line: usize,
    pub backup: Option<PathBuf>,
    original: String,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    max_file_size: usize,
    backup_enabled: bool,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            max_file_size: 1024 * 1024,
            backup_enabled: true,
        }
    }

    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    pub fn with_max_file_size(mut self, bytes: usize) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 检查路径是否在沙箱内
    pub fn resolve(&self, path: &str) -> Result<PathBuf, EditError> {
        let rel = path.trim_start_matches("./");
        let full = if Path::new(rel).is_absolute() {
            PathBuf::from(rel)
        } else {
            self.root.join(rel)
        };
        let canonical = full
            .canonicalize()
            .map_err(|_| EditError::NotFound(path.to_string()))?;
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(EditError::PathEscape(path.to_string()))
        }
    }

    pub fn read(&self, path: &str) -> Result<String, EditError> {
        let resolved = self.resolve(path)?;
        let size = std::fs::metadata(&resolved)?.len() as usize;
        if size > self.max_file_size {
            return Err(EditError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(std::fs::read_to_string(&resolved)?)
    }

    /// 将 old_string 的第一处出现替换为 new_string
    pub fn edit(&self, path: &str, old_string: &str, new_string: &str) -> Result<EditReceipt, EditError> {
        let resolved = self.resolve(path)?;
        let content = self.read(path)?;

        let (pos, matched_len) = match content.find(old_string) {
            Some(pos) if !old_string.is_empty() => (pos, old_string.len()),
            _ => find_with_indentation_tolerance(&content, old_string)
                .ok_or_else(|| EditError::NoMatch(path.to_string()))?,
        };

        let backup = if self.backup_enabled {
            let mut name = resolved.as_os_str().to_owned();
            name.push(".bak");
            let backup_path = PathBuf::from(name);
            std::fs::copy(&resolved, &backup_path)?;
            Some(backup_path)
        } else {
            None
        };

        let updated = format!(
            "{}{}{}",
            &content[..pos],
            new_string,
            &content[pos + matched_len..]
        );
        std::fs::write(&resolved, updated)?;

        let line = content[..pos].lines().count() + 1;
        tracing::info!(path = %resolved.display(), line, "source edited");
        Ok(EditReceipt {
            path: resolved,
            line,
            backup,
            original: content,
        })
    }

    /// 编辑后返回未确认的 PendingEdit；调用方 commit 之前被 drop 会自动还原
    pub fn edit_pending(&self, path: &str, old_string: &str, new_string: &str) -> Result<PendingEdit<'_>, EditError> {
        let receipt = self.edit(path, old_string, new_string)?;
        Ok(PendingEdit {
            workspace: self,
            receipt: Some(receipt),
        })
    }

    /// 还原一次编辑
    pub fn restore(&self, receipt: &EditReceipt) -> Result<(), EditError> {
        std::fs::write(&receipt.path, &receipt.original)?;
        tracing::info!(path = %receipt.path.display(), "source restored");
        Ok(())
    }
}

/// 尚未通过校验的编辑
///
/// 应用阶段超时或取消时 future 会被直接丢弃，Drop 保证写入的改动不会在未校验的情况下留在磁盘上。
pub struct PendingEdit<'a> {
    workspace: &'a Workspace,
    receipt: Option<EditReceipt>,
}

impl PendingEdit<'_> {
    pub fn receipt(&self) -> Option<&EditReceipt> {
        self.receipt.as_ref()
    }

    /// 确认保留改动
    pub fn commit(mut self) {
        self.receipt.take();
    }

    pub fn rollback(mut self) -> Result<(), EditError> {
        match self.receipt.take() {
            Some(receipt) => self.workspace.restore(&receipt),
            None => Ok(()),
        }
    }
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if let Some(receipt) = self.receipt.take() {
            match self.workspace.restore(&receipt) {
                Ok(()) => tracing::warn!(path = %receipt.path.display(), "uncommitted edit rolled back"),
                Err(e) => tracing::error!(path = %receipt.path.display(), error = %e, "failed to roll back uncommitted edit"),
            }
        }
    }
}

/// 忽略行首缩进逐行比较；返回 (字节位置, 实际匹配长度)
fn find_with_indentation_tolerance(content: &str, old_string: &str) -> Option<(usize, usize)> {
    let old_lines: Vec<&str> = old_string.lines().collect();
    if old_lines.iter().all(|l| l.trim().is_empty()) {
        return None;
    }

    // 每行起始字节偏移
    let mut offsets = Vec::new();
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        offsets.push(offset);
        offset += line.len();
    }
    let content_lines: Vec<&str> = content.lines().collect();

    (0..content_lines.len()).find_map(|i| {
        if i + old_lines.len() > content_lines.len() {
            return None;
        }
        let matched = old_lines
            .iter()
            .zip(&content_lines[i..])
            .all(|(old, line)| old.trim_start() == line.trim_start());
        if !matched {
            return None;
        }
        let last = i + old_lines.len() - 1;
        let end = offsets[last] + content_lines[last].len();
        Some((offsets[i], end - offsets[i]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(content: &str) -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/App.css"), content).unwrap();
        let ws = Workspace::new(dir.path());
        (dir, ws)
    }

    #[test]
    fn test_exact_edit_and_restore() {
        let (_dir, ws) = setup(".btn {\n  color: #999;\n}\n");
        let receipt = ws.edit("src/App.css", "color: #999;", "color: #222;").unwrap();
        assert_eq!(receipt.line, 2);
        assert!(receipt.backup.as_ref().unwrap().exists());
        assert!(ws.read("src/App.css").unwrap().contains("#222"));

        ws.restore(&receipt).unwrap();
        assert!(ws.read("./src/App.css").unwrap().contains("#999"));
    }

    #[test]
    fn test_indentation_tolerant_edit() {
        let (_dir, ws) = setup("a {\n    margin: 3px;\n    padding: 5px;\n}\n");
        ws.with_backup(false)
            .edit("src/App.css", "margin: 3px;\npadding: 5px;", "    margin: 8px;\n    padding: 8px;")
            .unwrap();
        let content = std::fs::read_to_string(_dir.path().join("src/App.css")).unwrap();
        assert_eq!(content, "a {\n    margin: 8px;\n    padding: 8px;\n}\n");
    }

    #[test]
    fn test_no_match() {
        let (_dir, ws) = setup("body {}\n");
        assert!(matches!(
            ws.edit("src/App.css", "h1 {}", "h1 { font-size: 2rem; }"),
            Err(EditError::NoMatch(_))
        ));
    }

    #[test]
    fn test_path_escape_rejected() {
        let outer = tempfile::tempdir().unwrap();
        std::fs::write(outer.path().join("secret.txt"), "x").unwrap();
        std::fs::create_dir_all(outer.path().join("root")).unwrap();
        let ws = Workspace::new(outer.path().join("root"));
        assert!(matches!(ws.read("../secret.txt"), Err(EditError::PathEscape(_))));
        assert!(matches!(ws.read("missing.css"), Err(EditError::NotFound(_))));
    }

    #[test]
    fn test_size_limit() {
        let (dir, ws) = setup(&"x".repeat(64));
        let ws = ws.with_max_file_size(16);
        assert!(matches!(ws.read("src/App.css"), Err(EditError::TooLarge { size: 64, max: 16 })));
        assert!(matches!(
            ws.edit("src/App.css", "x", "y"),
            Err(EditError::TooLarge { size: 64, max: 16 })
        ));
        let content = std::fs::read_to_string(dir.path().join("src/App.css")).unwrap();
        assert_eq!(content, "x".repeat(64));
    }

    #[test]
    fn test_pending_edit_dropped_is_rolled_back() {
        let (dir, ws) = setup("h1 { color: red; }\n");
        let path = dir.path().join("src/App.css");
        {
            let pending = ws.edit_pending("src/App.css", "red", "blue").unwrap();
            assert!(pending.receipt().is_some());
            assert!(std::fs::read_to_string(&path).unwrap().contains("blue"));
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "h1 { color: red; }\n");
    }

    #[test]
    fn test_pending_edit_commit_and_rollback() {
        let (dir, ws) = setup("h1 { color: red; }\n");
        let path = dir.path().join("src/App.css");

        ws.edit_pending("src/App.css", "red", "blue").unwrap().commit();
        assert!(std::fs::read_to_string(&path).unwrap().contains("blue"));

        ws.edit_pending("src/App.css", "blue", "green").unwrap().rollback().unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("blue"));
    }
}
