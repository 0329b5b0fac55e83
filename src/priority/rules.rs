//! 优先级规则（TOML）
//!
//! ```toml
//! trusted_domains = ["mybank.com"]
//! default = "low"
//!
//! [thresholds]
//! critical = 0.95
//! high = 0.75
//! med = 0.5
//!
//! [[patterns]]
//! regex = "invoice"
//! priority = "med"
//! ```

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::core::{AgentError, Priority};

/// 紧急度分数到优先级的阈值
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub critical: f32,
    pub high: f32,
    pub med: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            critical: 0.95,
            high: 0.75,
            med: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PatternEntry {
    regex: String,
    priority: Priority,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RulesFile {
    #[serde(alias = "bank_whitelist")]
    trusted_domains: Vec<String>,
    patterns: Vec<PatternEntry>,
    #[serde(alias = "llm_thresholds")]
    thresholds: Thresholds,
    default: Option<Priority>,
}

/// 编译后的正则规则
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub regex: Regex,
    pub priority: Priority,
}

/// 规则集：一次运行内不可变，运行之间可重新加载
#[derive(Debug, Clone)]
pub struct PriorityRules {
    pub trusted_domains: Vec<String>,
    pub patterns: Vec<PatternRule>,
    pub thresholds: Thresholds,
    pub default: Priority,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            trusted_domains: Vec::new(),
            patterns: Vec::new(),
            thresholds: Thresholds::default(),
            default: Priority::Low,
        }
    }
}

impl PriorityRules {
    /// 从 TOML 文本解析；正则非法时返回配置错误
    pub fn from_toml(text: &str) -> Result<Self, AgentError> {
        let file: RulesFile =
            toml::from_str(text).map_err(|e| AgentError::Config(format!("priority rules: {e}")))?;
        let patterns = file
            .patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(&p.regex)
                    .case_insensitive(true)
                    .build()
                    .map(|regex| PatternRule {
                        regex,
                        priority: p.priority,
                    })
                    .map_err(|e| AgentError::Config(format!("invalid pattern '{}': {e}", p.regex)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            trusted_domains: file
                .trusted_domains
                .into_iter()
                .map(|d| d.trim().to_lowercase())
                .collect(),
            patterns,
            thresholds: file.thresholds,
            default: file.default.unwrap_or(Priority::Low),
        })
    }

    /// 文件不存在时返回空规则集（默认阈值）
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let rules = Self::from_toml(&text)?;
                tracing::info!(
                    path = %path.display(),
                    patterns = rules.patterns.len(),
                    trusted_domains = rules.trusted_domains.len(),
                    "priority rules loaded"
                );
                Ok(rules)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no priority rules at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn with_pattern(mut self, pattern: &str, priority: Priority) -> Result<Self, AgentError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| AgentError::Config(format!("invalid pattern '{pattern}': {e}")))?;
        self.patterns.push(PatternRule { regex, priority });
        Ok(self)
    }

    pub fn with_trusted_domain(mut self, domain: &str) -> Self {
        self.trusted_domains.push(domain.trim().to_lowercase());
        self
    }

    /// 确定性规则：可信域名直接返回 high，否则按顺序取第一条匹配的正则
    pub fn match_rule(&self, objective: &str, sender: Option<&str>) -> Option<Priority> {
        if let Some(sender) = sender {
            let domain = sender.rsplit('@').next().unwrap_or(sender).trim().to_lowercase();
            if !domain.is_empty() && self.trusted_domains.iter().any(|d| *d == domain) {
                return Some(Priority::High);
            }
        }
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(objective))
            .map(|p| p.priority)
    }

    /// 分数映射到优先级
    pub fn priority_for_score(&self, score: f32) -> Priority {
        let t = &self.thresholds;
        if score >= t.critical {
            Priority::Critical
        } else if score >= t.high {
            Priority::High
        } else if score >= t.med {
            Priority::Med
        } else {
            self.default
        }
    }
}
