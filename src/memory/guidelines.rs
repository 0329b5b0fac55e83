//! 持久化指导文本（guidelines）
//!
//! 由 meta-agent 根据审批反思合成，Plan / Respond 节点在非空时作为 system 消息前置。

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Guidelines {
    path: PathBuf,
}

impl Guidelines {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取指导文本；文件不存在或内容为空时返回 None
    pub fn load(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn save(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, text.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_blank_guidelines() {
        let dir = tempfile::tempdir().unwrap();
        let g = Guidelines::new(dir.path().join("guidelines.txt"));
        assert!(g.load().is_none());
        g.save("   \n").unwrap();
        assert!(g.load().is_none());
        g.save("Always confirm payee before paying.\n").unwrap();
        assert_eq!(g.load().as_deref(), Some("Always confirm payee before paying."));
    }
}
