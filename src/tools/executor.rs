//! 工具执行器（Execution capability）
//!
//! 持有 ToolRegistry 与全局超时，对每次调用施加超时，超时或失败时转为 AgentError
//! （ToolTimeout / ToolExecutionFailed / UnknownTool）；每次调用输出结构化审计日志（JSON）。

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::core::{AgentError, ToolCall};
use crate::tools::ToolRegistry;

/// 单个工具调用的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    pub output: String,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    /// 配置中额外声明需要审批的工具
    approval_tools: HashSet<String>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            approval_tools: HashSet::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_approval_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.approval_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// 该调用是否需要人工审批
    pub fn requires_approval(&self, call: &ToolCall) -> bool {
        self.approval_tools.contains(&call.tool)
            || self
                .registry
                .get(&call.tool)
                .is_some_and(|t| t.requires_approval())
    }

    /// 执行指定工具；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: serde_json::Value) -> Result<String, AgentError> {
        let Some(tool) = self.registry.get(tool_name) else {
            return Err(AgentError::UnknownTool(tool_name.to_string()));
        };
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!("{tool_name}: {e}"))),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 依次执行一组调用；任一失败即返回错误
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Result<Vec<ToolOutput>, AgentError> {
        let mut outputs = Vec::with_capacity(calls.len());
        for call in calls {
            let output = self.execute(&call.tool, call.args.clone()).await?;
            outputs.push(ToolOutput {
                tool: call.tool.clone(),
                output,
            });
        }
        Ok(outputs)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct PayTool;

    #[async_trait]
    impl Tool for PayTool {
        fn name(&self) -> &str {
            "pay"
        }
        fn description(&self) -> &str {
            "moves money"
        }
        fn requires_approval(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("bank offline".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        registry.register(PayTool);
        ToolExecutor::new(registry, 1).with_approval_tools(["echo_loud"])
    }

    #[tokio::test]
    async fn test_execute_all_in_order() {
        let exec = executor();
        let calls = vec![
            ToolCall::new("echo", json!({"text": "a"})),
            ToolCall::new("echo", json!({"text": "b"})),
        ];
        let out = exec.execute_all(&calls).await.unwrap();
        assert_eq!(out.iter().map(|o| o.output.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(exec.execute_all(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_classified() {
        let exec = executor();
        assert!(matches!(
            exec.execute("missing", Value::Null).await,
            Err(AgentError::UnknownTool(_))
        ));
        assert!(matches!(
            exec.execute("pay", Value::Null).await,
            Err(AgentError::ToolExecutionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = executor().with_timeout(Duration::from_millis(50));
        assert!(matches!(
            exec.execute("slow", Value::Null).await,
            Err(AgentError::ToolTimeout(_))
        ));
    }

    #[test]
    fn test_requires_approval_from_tool_or_config() {
        let exec = executor();
        assert!(exec.requires_approval(&ToolCall::new("pay", Value::Null)));
        assert!(exec.requires_approval(&ToolCall::new("echo_loud", Value::Null)));
        assert!(!exec.requires_approval(&ToolCall::new("echo", Value::Null)));
    }
}
