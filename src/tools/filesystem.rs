//! file_create 步骤
//!
//! 相对路径以工作目录为基准，绝对路径原样使用；父目录自动创建，写入覆盖已有内容。

use std::path::{Path, PathBuf};

use super::{StepFailure, StepResult};

#[derive(Debug, Clone)]
pub struct WorkspaceFs {
    root_dir: PathBuf,
}

impl WorkspaceFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path.trim());
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root_dir.join(p.strip_prefix("./").unwrap_or(p))
        }
    }

    pub async fn create_file(&self, path: &str, content: &str) -> StepResult {
        if path.trim().is_empty() {
            return StepResult::failed(StepFailure::Io("empty path".into()), "", None);
        }
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return StepResult::failed(StepFailure::Io(e.to_string()), "", None);
            }
        }
        match tokio::fs::write(&target, content).await {
            Ok(()) => {
                tracing::info!(path = %target.display(), bytes = content.len(), "file_create step");
                StepResult::ok(format!("wrote {} bytes to {}", content.len(), target.display()))
            }
            Err(e) => StepResult::failed(StepFailure::Io(e.to_string()), "", None),
        }
    }
}
