//! 质量门：对 assistant 回复做轻量启发式分类
//!
//! 模型拿到数据却找不到精确事实时，常输出「你可以这样搜索…」之类的泛化文本；
//! 质量门把这类回复标为 Bad，由 Turn Controller 决定是否强制纠正。
//! 纯函数：无外部状态，同一输入恒得同一结论。
//!
//! 判定顺序：
//! 1. 命中任一否定短语（大小写不敏感子串）→ Bad
//! 2. 命中任一正向模式（大小写不敏感正则），或字符数低于短答阈值 → Good
//! 3. 否则 → Uncertain

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::QualitySection;

/// 质量结论，携带原文
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityVerdict {
    Good(String),
    Bad(String),
    Uncertain(String),
}

impl QualityVerdict {
    pub fn label(&self) -> VerdictLabel {
        match self {
            QualityVerdict::Good(_) => VerdictLabel::Good,
            QualityVerdict::Bad(_) => VerdictLabel::Bad,
            QualityVerdict::Uncertain(_) => VerdictLabel::Uncertain,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            QualityVerdict::Good(t) | QualityVerdict::Bad(t) | QualityVerdict::Uncertain(t) => t,
        }
    }
}

/// 不带文本的结论标签（用于事件与日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictLabel {
    Good,
    Bad,
    Uncertain,
}

/// 质量门：持有小写化的否定短语、编译好的正向模式与短答阈值
#[derive(Debug, Clone)]
pub struct QualityGate {
    deny_phrases: Vec<String>,
    direct_patterns: Vec<Regex>,
    short_answer_chars: usize,
}

impl QualityGate {
    pub fn new(
        deny_phrases: impl IntoIterator<Item = impl Into<String>>,
        direct_patterns: Vec<Regex>,
        short_answer_chars: usize,
    ) -> Self {
        Self {
            deny_phrases: deny_phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            direct_patterns,
            short_answer_chars,
        }
    }

    /// 从配置创建；无法编译的正则记一条警告后跳过
    pub fn from_config(section: &QualitySection) -> Self {
        let patterns = section
            .direct_answer_patterns
            .iter()
            .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "skipping invalid direct-answer pattern");
                    None
                }
            })
            .collect();
        Self::new(
            section.deny_phrases.iter().cloned(),
            patterns,
            section.short_answer_chars,
        )
    }

    pub fn classify(&self, text: &str) -> QualityVerdict {
        let lowered = text.to_lowercase();
        if self.deny_phrases.iter().any(|p| lowered.contains(p.as_str())) {
            return QualityVerdict::Bad(text.to_string());
        }
        let is_direct = self.direct_patterns.iter().any(|re| re.is_match(text));
        if is_direct || text.chars().count() < self.short_answer_chars {
            QualityVerdict::Good(text.to_string())
        } else {
            QualityVerdict::Uncertain(text.to_string())
        }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::from_config(&QualitySection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_filler(n: usize) -> String {
        "lorem ipsum ".repeat(n)
    }

    #[test]
    fn test_deny_phrase_is_bad_case_insensitive() {
        let gate = QualityGate::default();
        let verdict = gate.classify("Here Are Some Recommendations for finding resources");
        assert_eq!(verdict.label(), VerdictLabel::Bad);
    }

    #[test]
    fn test_deny_beats_direct_pattern() {
        let gate = QualityGate::default();
        let verdict = gate.classify("Resources is a catalog. You can find it in the menu.");
        assert_eq!(verdict.label(), VerdictLabel::Bad);
    }

    #[test]
    fn test_short_answer_is_good() {
        let gate = QualityGate::default();
        assert_eq!(gate.classify("42 open orders").label(), VerdictLabel::Good);
    }

    #[test]
    fn test_long_direct_answer_is_good() {
        let gate = QualityGate::default();
        let text = format!("Resources is a catalog of the system. {}", long_filler(40));
        assert!(text.chars().count() > 300);
        assert_eq!(gate.classify(&text).label(), VerdictLabel::Good);
    }

    #[test]
    fn test_long_neutral_answer_is_uncertain() {
        let gate = QualityGate::default();
        let text = long_filler(40);
        assert_eq!(gate.classify(&text).label(), VerdictLabel::Uncertain);
    }

    #[test]
    fn test_threshold_counts_chars_not_bytes() {
        let gate = QualityGate::new(Vec::<String>::new(), Vec::new(), 10);
        // 阈值按字符计：10 个西里尔字符（20 字节）恰好不低于阈值
        assert_eq!(gate.classify("Справочник").label(), VerdictLabel::Uncertain);
        assert_eq!(gate.classify("Справочни").label(), VerdictLabel::Good);
    }

    #[test]
    fn test_cyrillic_deny_phrase_matches_any_case() {
        let gate = QualityGate::new(vec!["можете найти"], Vec::new(), 300);
        assert_eq!(
            gate.classify("Вы МОЖЕТЕ НАЙТИ это в справочнике").label(),
            VerdictLabel::Bad
        );
    }

    #[test]
    fn test_default_gate_flags_russian_hedging() {
        let gate = QualityGate::default();
        for text in [
            "Вы можете найти ресурсы в меню справочников.",
            "Ресурсы можете найти в разделе Справочники.",
            "Чтобы найти нужный объект, откройте раздел Справочники.",
            "Используйте следующие рекомендации: откройте конфигуратор.",
        ] {
            assert_eq!(gate.classify(text).label(), VerdictLabel::Bad, "{}", text);
        }
    }

    #[test]
    fn test_default_gate_accepts_long_russian_direct_answer() {
        let gate = QualityGate::default();
        let text = format!(
            "Ресурсы является справочником (системное имя: Resources). {}",
            long_filler(40)
        );
        assert_eq!(gate.classify(&text).label(), VerdictLabel::Good);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let section = QualitySection {
            deny_phrases: Vec::new(),
            direct_answer_patterns: vec!["(unclosed".to_string(), r"\brefers to\b".to_string()],
            short_answer_chars: 0,
        };
        let gate = QualityGate::from_config(&section);
        assert_eq!(gate.classify("it refers to X").label(), VerdictLabel::Good);
        assert_eq!(gate.classify("nothing").label(), VerdictLabel::Uncertain);
    }

    #[test]
    fn test_classify_is_pure() {
        let gate = QualityGate::default();
        let text = format!("{} you could search the catalog", long_filler(10));
        let first = gate.classify(&text);
        for _ in 0..5 {
            assert_eq!(gate.classify(&text), first);
        }
        assert_eq!(first.into_text(), text);
    }
}
