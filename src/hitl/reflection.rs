//! 审批反思日志（JSON Lines）
//!
//! 每条审批决定追加一行 `{"task_id", "result", "ts"}`；写入后 fsync，保证先于快照删除落盘。

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::hitl::lock;

/// 人工决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    pub task_id: String,
    pub result: Decision,
    pub ts: DateTime<Utc>,
}

impl ReflectionRecord {
    pub fn new(task_id: impl Into<String>, result: Decision) -> Self {
        Self {
            task_id: task_id.into(),
            result,
            ts: Utc::now(),
        }
    }

    /// 写入检索库的正文
    pub fn index_text(&self) -> String {
        serde_json::json!({ "task_id": self.task_id, "result": self.result }).to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ReflectionLog {
    path: PathBuf,
}

impl ReflectionLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ReflectionRecord) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        lock::lock_exclusive(&file)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// 最近的 n 条记录（新的在前）；文件不存在时为空，损坏的行跳过
    pub fn recent(&self, n: usize) -> Result<Vec<ReflectionRecord>, AgentError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        lock::lock_shared(&file)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ReflectionRecord>(&line) {
                Ok(r) => records.push(r),
                Err(e) => tracing::warn!("skipping malformed reflection line: {}", e),
            }
        }
        records.reverse();
        records.truncate(n);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReflectionLog::new(dir.path().join("logs/hitl_log.jsonl"));
        assert!(log.recent(5).unwrap().is_empty());

        log.append(&ReflectionRecord::new("t1", Decision::Approved)).unwrap();
        log.append(&ReflectionRecord::new("t2", Decision::Rejected)).unwrap();

        let recent = log.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].task_id, "t2");

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert!(raw.lines().next().unwrap().contains("\"result\":\"approved\""));
    }

    #[test]
    fn test_index_text_shape() {
        let r = ReflectionRecord::new("t9", Decision::Rejected);
        let v: serde_json::Value = serde_json::from_str(&r.index_text()).unwrap();
        assert_eq!(v["task_id"], "t9");
        assert_eq!(v["result"], "rejected");
    }
}
