//! 任务存储：SQLite 持久化 + 向量索引同步
pub mod task_store;

pub use task_store::TaskStore;
