//! 两阶段优先级判定：确定性规则 + LLM 紧急度分数，取二者较高者

use std::sync::Arc;

use crate::core::{AgentError, Priority};
use crate::llm::LlmClient;
use crate::memory::{Message, TokenBudgeter};
use crate::priority::PriorityRules;

/// 判定结果（含中间信号，便于日志与调试）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub priority: Priority,
    /// 确定性规则的结果，未命中为 None
    pub rule: Option<Priority>,
    pub score: f32,
    /// 分数映射出的优先级
    pub scored: Priority,
}

/// 规则命中时取二者中数值较高者；未命中时分数结果直接生效
pub fn tie_break(rule: Option<Priority>, scored: Priority) -> Priority {
    match rule {
        Some(r) => r.max(scored),
        None => scored,
    }
}

/// 从回复中取第一个位于 [0, 1] 的数值；找不到时为 0.0
pub fn parse_urgency(reply: &str) -> f32 {
    reply
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|tok| tok.trim_end_matches('.'))
        .filter(|tok| !tok.is_empty())
        .filter_map(|tok| tok.parse::<f32>().ok())
        .find(|v| (0.0..=1.0).contains(v))
        .unwrap_or(0.0)
}

pub fn urgency_prompt(objective: &str) -> String {
    format!(
        "On a scale from 0 to 1, how urgent is the following task? Respond with just the number.\nTask: {objective}"
    )
}

pub struct PriorityResolver {
    llm: Arc<dyn LlmClient>,
    rules: Arc<PriorityRules>,
    budgeter: TokenBudgeter,
}

impl PriorityResolver {
    pub fn new(llm: Arc<dyn LlmClient>, rules: Arc<PriorityRules>, budgeter: TokenBudgeter) -> Self {
        Self {
            llm,
            rules,
            budgeter,
        }
    }

    pub fn rules(&self) -> &PriorityRules {
        &self.rules
    }

    /// 询问 LLM 紧急度；模型不可达属于外部错误，回复无法解析则降级为 0.0
    pub async fn score(&self, objective: &str) -> Result<f32, AgentError> {
        let messages = self.budgeter.fit(&[Message::user(urgency_prompt(objective))]).items;
        let reply = self.llm.chat(&messages).await?;
        let score = parse_urgency(&reply.content);
        if score == 0.0 {
            tracing::debug!(reply = %reply.content, "urgency reply scored 0.0");
        }
        Ok(score)
    }

    pub async fn resolve(&self, objective: &str, sender: Option<&str>) -> Result<Resolution, AgentError> {
        let rule = self.rules.match_rule(objective, sender);
        let score = self.score(objective).await?;
        let scored = self.rules.priority_for_score(score);
        let priority = tie_break(rule, scored);
        tracing::debug!(
            objective,
            rule = ?rule,
            score,
            scored = %scored,
            priority = %priority,
            "priority resolved"
        );
        Ok(Resolution {
            priority,
            rule,
            score,
            scored,
        })
    }
}
