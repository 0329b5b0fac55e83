//! 事件总线：注册 / 注销 / 非阻塞广播 + 持久化

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::core::AgentError;
use crate::events::{Event, RotatingLog};

#[derive(Debug, Default)]
pub struct EventBroker {
    listeners: RwLock<HashMap<u64, UnboundedSender<Event>>>,
    next_id: AtomicU64,
    log: Option<RotatingLog>,
}

impl EventBroker {
    /// 只做实时分发，不落盘
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: RotatingLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    // 监听表只有插入 / 删除，持锁方 panic 后表本身仍然一致，直接取回
    fn read_listeners(&self) -> RwLockReadGuard<'_, HashMap<u64, UnboundedSender<Event>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_listeners(&self) -> RwLockWriteGuard<'_, HashMap<u64, UnboundedSender<Event>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册监听者，返回 id 与接收端
    pub fn register(&self) -> (u64, UnboundedReceiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        self.write_listeners().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.write_listeners().remove(&id);
    }

    /// 注册并返回随 drop 自动注销的订阅
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (id, rx) = self.register();
        Subscription {
            id,
            rx,
            broker: Arc::clone(self),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.read_listeners().len()
    }

    /// 投递给所有监听者并追加到日志；从不阻塞、从不失败
    pub fn emit(&self, event: Event) {
        let closed: Vec<u64> = self
            .read_listeners()
            .iter()
            .filter(|(_, tx)| tx.send(event.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        if !closed.is_empty() {
            let mut listeners = self.write_listeners();
            for id in closed {
                listeners.remove(&id);
            }
        }

        if let Some(log) = &self.log {
            let written = serde_json::to_string(&event)
                .map_err(AgentError::from)
                .and_then(|line| log.append(&line));
            if let Err(e) = written {
                tracing::warn!("event log append failed: {}", e);
            }
        }
    }
}

/// 订阅句柄：drop 时自动从总线注销
pub struct Subscription {
    id: u64,
    rx: UnboundedReceiver<Event>,
    broker: Arc<EventBroker>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_emit_reaches_every_listener() {
        let broker = Arc::new(EventBroker::new());
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();
        broker.emit(Event::start("plan"));

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.component, "plan");
        assert_eq!(ea.kind, EventKind::Start);
        assert_eq!(ea, eb);
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let broker = Arc::new(EventBroker::new());
        let sub = broker.subscribe();
        assert_eq!(broker.listener_count(), 1);
        drop(sub);
        assert_eq!(broker.listener_count(), 0);
    }

    #[test]
    fn test_emit_prunes_closed_receivers() {
        let broker = EventBroker::new();
        let (_id, rx) = broker.register();
        drop(rx);
        broker.emit(Event::end("execute"));
        assert_eq!(broker.listener_count(), 0);
    }

    #[test]
    fn test_emit_without_listeners_still_logs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let broker = EventBroker::with_log(RotatingLog::new(&path, 1024));
        broker.emit(Event::notice("hitl", serde_json::json!({"task_id": "t1"})));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"kind\":\"notice\""));
        assert!(raw.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_register_after_poisoned_lock_still_delivers() {
        let broker = Arc::new(EventBroker::new());
        let poisoner = Arc::clone(&broker);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.listeners.write().unwrap();
            panic!("listener holder crashed");
        })
        .join();
        assert!(broker.listeners.is_poisoned());

        let mut sub = broker.subscribe();
        assert_eq!(broker.listener_count(), 1);
        broker.emit(Event::start("plan"));
        assert_eq!(sub.recv().await.unwrap().component, "plan");
        drop(sub);
        assert_eq!(broker.listener_count(), 0);
    }

    #[test]
    fn test_concurrent_register_and_emit() {
        let broker = Arc::new(EventBroker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let broker = Arc::clone(&broker);
                std::thread::spawn(move || {
                    let (id, _rx) = broker.register();
                    broker.emit(Event::start(format!("n{i}")));
                    broker.unregister(id);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(broker.listener_count(), 0);
    }
}
