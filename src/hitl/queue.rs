//! HITL 审批队列
//!
//! 每个等待审批的任务对应 `<queue_dir>/<task_id>.json`，内容为序列化的 AgentState。
//! 先写到同目录的 `.tmp` 文件（持排他 flock），再原子 rename 成正式快照；
//! 超过 TTL 未处理的快照由 sweep 删除。
//! approve / reject 取最早的快照：先追加反思日志，再写检索库，最后删除快照；
//! 删除时文件已不存在视为成功（sweep 可能并发删除）。

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::core::{AgentError, AgentState};
use crate::hitl::lock;
use crate::hitl::{Decision, ReflectionLog, ReflectionRecord};
use crate::retrieval::{Document, VectorIndex};

/// 默认保留 24 小时
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// 待审批条目
#[derive(Debug, Clone)]
pub struct PendingItem {
    pub task_id: String,
    pub objective: String,
    pub path: PathBuf,
    pub queued_at: SystemTime,
}

/// 审批结果：反思记录 + 被取出的快照
#[derive(Debug, Clone)]
pub struct Decided {
    pub record: ReflectionRecord,
    pub state: AgentState,
}

pub struct HitlQueue {
    dir: PathBuf,
    ttl: Duration,
    log: ReflectionLog,
    index: Option<(Arc<dyn VectorIndex>, String)>,
}

fn is_not_found(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

/// 删除文件，文件已不存在时返回 Ok(false)
fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_snapshot(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    lock::lock_shared(&file)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

impl HitlQueue {
    pub fn new(dir: impl AsRef<Path>, log: ReflectionLog) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ttl: DEFAULT_TTL,
            log,
            index: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// 审批记录同时写入检索库（供 meta-agent 使用）
    pub fn with_index(mut self, index: Arc<dyn VectorIndex>, collection: impl Into<String>) -> Self {
        self.index = Some((index, collection.into()));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn reflection_log(&self) -> &ReflectionLog {
        &self.log
    }

    pub fn snapshot_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.snapshot_path(task_id).exists()
    }

    /// 写入当前状态快照；状态中必须有 current_task
    pub fn enqueue(&self, state: &AgentState) -> Result<PathBuf, AgentError> {
        let task = state
            .current_task
            .as_ref()
            .ok_or_else(|| AgentError::Hitl("snapshot requires a current task".to_string()))?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.snapshot_path(&task.task_id);
        let json = serde_json::to_vec_pretty(state)?;

        // 读者只会看到 rename 之后的完整文件
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", task.task_id, uuid::Uuid::new_v4()));
        let written = (|| -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            lock::lock_exclusive(&file)?;
            file.write_all(&json)?;
            file.sync_data()?;
            std::fs::rename(&tmp, &path)
        })();
        if let Err(e) = written {
            let _ = remove_if_exists(&tmp);
            return Err(e.into());
        }

        tracing::info!(task_id = %task.task_id, path = %path.display(), "task queued for approval");
        Ok(path)
    }

    /// 删除超过 TTL 的快照，返回被删除快照的 task_id；
    /// 存储中的任务状态由 `Orchestrator::sweep` 负责收尾
    pub fn sweep(&self) -> Result<Vec<String>, AgentError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut removed = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.ttl && remove_if_exists(&path)? {
                tracing::info!(path = %path.display(), age_secs = age.as_secs(), "expired HITL snapshot removed");
                if let Some(task_id) = path.file_stem().and_then(|s| s.to_str()) {
                    removed.push(task_id.to_string());
                }
            }
        }
        Ok(removed)
    }

    /// 待审批条目，最早入队的在前
    pub fn list(&self) -> Result<Vec<PendingItem>, AgentError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut items = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(task_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let queued_at = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let objective = match read_snapshot(&path) {
                Ok(raw) => serde_json::from_str::<AgentState>(&raw)
                    .ok()
                    .and_then(|s| s.current_task.map(|t| t.objective))
                    .unwrap_or_else(|| "no objective".to_string()),
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            items.push(PendingItem {
                task_id,
                objective,
                path,
                queued_at,
            });
        }
        items.sort_by(|a, b| a.queued_at.cmp(&b.queued_at).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(items)
    }

    /// 处理最早的待审批条目；队列为空时返回 None
    pub async fn decide(&self, decision: Decision) -> Result<Option<Decided>, AgentError> {
        for item in self.list()? {
            if let Some(decided) = self.decide_item(&item.task_id, &item.path, decision).await? {
                return Ok(Some(decided));
            }
        }
        Ok(None)
    }

    /// 处理指定任务的快照；快照不存在时返回 None
    pub async fn decide_task(&self, task_id: &str, decision: Decision) -> Result<Option<Decided>, AgentError> {
        let path = self.snapshot_path(task_id);
        self.decide_item(task_id, &path, decision).await
    }

    async fn decide_item(
        &self,
        task_id: &str,
        path: &Path,
        decision: Decision,
    ) -> Result<Option<Decided>, AgentError> {
        let raw = match read_snapshot(path) {
            Ok(raw) => raw,
            // 被 sweep 或另一个审批者抢先处理
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: AgentState = serde_json::from_str(&raw)
            .map_err(|e| AgentError::Hitl(format!("corrupt snapshot {}: {e}", path.display())))?;

        let record = ReflectionRecord::new(task_id, decision);
        self.log.append(&record)?;

        if let Some((index, collection)) = &self.index {
            let doc = Document::new(record.index_text())
                .with_metadata("task_id", serde_json::Value::String(task_id.to_string()));
            if let Err(e) = index.add(collection, task_id, doc).await {
                tracing::warn!(task_id, "reflection indexing failed: {}", e);
            }
        }

        remove_if_exists(path)?;
        tracing::info!(task_id, result = %decision, "HITL decision recorded");
        Ok(Some(Decided { record, state }))
    }

    /// 丢弃快照（任务被取消时），不写反思日志
    pub fn discard(&self, task_id: &str) -> Result<bool, AgentError> {
        Ok(remove_if_exists(&self.snapshot_path(task_id))?)
    }
}
