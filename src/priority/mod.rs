//! 优先级：规则集与两阶段判定

pub mod resolver;
pub mod rules;

pub use resolver::{parse_urgency, tie_break, PriorityResolver, Resolution};
pub use rules::{PatternRule, PriorityRules, Thresholds};
