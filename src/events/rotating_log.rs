//! 按大小轮转的 JSON Lines 日志
//!
//! 追加前若「当前大小 + 新行长度」超过阈值，先把现有文件重命名为带时间戳后缀的文件，再写新文件。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::core::AgentError;
use crate::hitl::lock;

pub const DEFAULT_ROTATE_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug)]
pub struct RotatingLog {
    path: PathBuf,
    rotate_bytes: u64,
    /// 进程内串行化；跨进程由 flock 保护
    guard: Mutex<()>,
}

impl RotatingLog {
    pub fn new(path: impl AsRef<Path>, rotate_bytes: u64) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            rotate_bytes,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ");
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("events.jsonl");
        self.path.with_file_name(format!("{name}.{stamp}"))
    }

    /// 追加一行（自动补换行），必要时先轮转；返回是否发生了轮转
    pub fn append(&self, line: &str) -> Result<bool, AgentError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| AgentError::LockPoisoned("event log"))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let needed = line.len() as u64 + 1;
        let size = match std::fs::metadata(&self.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let rotated = size > 0 && size + needed > self.rotate_bytes;
        if rotated {
            let target = self.rotated_path();
            std::fs::rename(&self.path, &target)?;
            tracing::debug!(from = %self.path.display(), to = %target.display(), "event log rotated");
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        lock::lock_exclusive(&file)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())?;
        Ok(rotated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_starts_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let log = RotatingLog::new(&path, 32);

        assert!(!log.append("{\"n\":1,\"pad\":\"xxxxxxxx\"}").unwrap());
        assert!(log.append("{\"n\":2,\"pad\":\"yyyyyyyy\"}").unwrap());

        let current = std::fs::read_to_string(&path).unwrap();
        assert_eq!(current, "{\"n\":2,\"pad\":\"yyyyyyyy\"}\n");

        let rotated: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("events.jsonl."))
            .collect();
        assert_eq!(rotated.len(), 1);
        let old = std::fs::read_to_string(rotated[0].path()).unwrap();
        assert!(old.contains("\"n\":1"));
    }

    #[test]
    fn test_oversized_first_line_is_still_written() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::new(dir.path().join("e.jsonl"), 4);
        assert!(!log.append("a very long first line").unwrap());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
