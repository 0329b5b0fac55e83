//! 任务持久化：SQLite 任务表 + 目标文本的向量索引
//!
//! 每次变更都会重建索引：update / delete 先删除旧索引项，再写入新的。
//! SQLite 连接由 Mutex 保护，锁只在同步段内持有，不跨 await。

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::core::{AgentError, Task, TaskStatus};
use crate::retrieval::{Document, VectorIndex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    task_id    TEXT PRIMARY KEY,
    status     TEXT NOT NULL,
    priority   TEXT NOT NULL,
    data       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
";

pub struct TaskStore {
    conn: Mutex<Connection>,
    index: Arc<dyn VectorIndex>,
    collection: String,
}

impl TaskStore {
    /// 打开（或创建）数据库文件，父目录不存在时自动创建
    pub fn open(path: &Path, index: Arc<dyn VectorIndex>) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::with_connection(Connection::open(path)?, index)
    }

    pub fn in_memory(index: Arc<dyn VectorIndex>) -> Result<Self, AgentError> {
        Self::with_connection(Connection::open_in_memory()?, index)
    }

    fn with_connection(conn: Connection, index: Arc<dyn VectorIndex>) -> Result<Self, AgentError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            index,
            collection: "task_snippets".to_string(),
        })
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::LockPoisoned("task store"))
    }

    fn upsert_row(&self, task: &Task) -> Result<(), AgentError> {
        let data = serde_json::to_string(task)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tasks (task_id, status, priority, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task.task_id,
                task.status.as_str(),
                task.priority.as_str(),
                data,
                task.created_at.to_rfc3339(),
                task.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn snippet(task: &Task) -> Document {
        Document::new(task.objective.clone())
            .with_metadata("task_id", serde_json::Value::String(task.task_id.clone()))
            .with_metadata("status", serde_json::Value::String(task.status.as_str().to_string()))
    }

    pub async fn add(&self, task: &Task) -> Result<(), AgentError> {
        self.upsert_row(task)?;
        self.index
            .add(&self.collection, &task.task_id, Self::snippet(task))
            .await
    }

    pub async fn update(&self, task: &Task) -> Result<(), AgentError> {
        self.upsert_row(task)?;
        self.index.remove(&self.collection, &task.task_id).await?;
        self.index
            .add(&self.collection, &task.task_id, Self::snippet(task))
            .await
    }

    /// 删除任务；不存在时返回 false
    pub async fn delete(&self, task_id: &str) -> Result<bool, AgentError> {
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])?
        };
        self.index.remove(&self.collection, task_id).await?;
        Ok(removed > 0)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM tasks WHERE task_id = ?1")?;
        let result = stmt.query_row(params![task_id], |row| row.get::<_, String>(0));
        match result {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按创建时间排序的全部任务
    pub fn list(&self) -> Result<Vec<Task>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM tasks ORDER BY created_at, task_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for data in rows {
            tasks.push(serde_json::from_str(&data?)?);
        }
        Ok(tasks)
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, AgentError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM tasks WHERE status = ?1 ORDER BY created_at, task_id")?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for data in rows {
            tasks.push(serde_json::from_str(&data?)?);
        }
        Ok(tasks)
    }

    /// 按目标文本检索相似任务
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, AgentError> {
        self.index.search(&self.collection, query, k, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Priority;
    use crate::retrieval::InMemoryVectorIndex;

    fn store() -> (TaskStore, Arc<InMemoryVectorIndex>) {
        let index = Arc::new(InMemoryVectorIndex::new());
        (TaskStore::in_memory(index.clone()).unwrap(), index)
    }

    #[tokio::test]
    async fn test_add_get_list() {
        let (store, index) = store();
        let mut task = Task::new("pay invoice #123");
        task.priority = Priority::Med;
        store.add(&task).await.unwrap();

        let loaded = store.get(&task.task_id).unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(index.len("task_snippets"), 1);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_reindexes_without_duplicates() {
        let (store, index) = store();
        let mut task = Task::new("draft report");
        store.add(&task).await.unwrap();
        task.objective = "draft quarterly report".to_string();
        task.set_status(TaskStatus::InProgress).unwrap();
        store.update(&task).await.unwrap();

        assert_eq!(index.len("task_snippets"), 1);
        let hits = store.search("quarterly", 5).await.unwrap();
        assert_eq!(hits[0].text, "draft quarterly report");
        assert_eq!(store.list_by_status(TaskStatus::InProgress).unwrap().len(), 1);
        assert!(store.list_by_status(TaskStatus::Ready).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_index() {
        let (store, index) = store();
        let task = Task::new("book flights");
        store.add(&task).await.unwrap();
        assert!(store.delete(&task.task_id).await.unwrap());
        assert!(!store.delete(&task.task_id).await.unwrap());
        assert!(store.get(&task.task_id).unwrap().is_none());
        assert!(index.is_empty("task_snippets"));
    }

    #[tokio::test]
    async fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/tasks.db");
        let store = TaskStore::open(&path, Arc::new(InMemoryVectorIndex::new())).unwrap();
        store.add(&Task::new("x")).await.unwrap();
        assert!(path.exists());
    }
}
