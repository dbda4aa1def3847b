//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预置回复；预置回复用完后返回一份固定的占位评估（全部维度中等分数）。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message};

/// 预置回复队列中的一项
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| MockReply::Text(s.into())).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_reply(&self, reply: MockReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// complete 被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// 占位评估：与离线模式的基线分数一致
pub const PLACEHOLDER_EVALUATION: &str = r#"```json
{
  "dimension_scores": {
    "visual_hierarchy": 6.5,
    "typography": 6.0,
    "color_contrast": 7.0,
    "spacing_layout": 5.5,
    "component_design": 6.5,
    "animation_interaction": 7.0,
    "accessibility": 5.0,
    "overall_aesthetic": 6.0
  },
  "issues": [
    {"dimension": "accessibility", "severity": "high", "description": "Focus indicators are missing on interactive elements"},
    {"dimension": "spacing_layout", "severity": "medium", "description": "Inconsistent vertical rhythm between sections"}
  ],
  "recommendations": [
    {"dimension": "accessibility", "title": "Add visible focus rings", "description": "Use a 2px outline on :focus-visible", "impact": 8, "effort": 2},
    {"dimension": "spacing_layout", "title": "Adopt an 8px spacing scale", "description": "Replace ad-hoc margins with scale tokens", "impact": 7, "effort": 4},
    {"dimension": "typography", "title": "Increase body line-height", "description": "Set line-height to 1.6 for paragraphs", "impact": 5, "effort": 1}
  ],
  "summary": "Solid base; accessibility and spacing need work."
}
```"#;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .replies
            .lock()
            .map_err(|e| LlmError::Api(e.to_string()))?
            .pop_front();
        match next {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::Fail(err)) => Err(LlmError::Api(err)),
            None => Ok(PLACEHOLDER_EVALUATION.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_placeholder() {
        let mock = MockLlmClient::with_replies(["first"]);
        mock.push_reply(MockReply::Fail("rate limited".into()));

        assert_eq!(mock.complete(&[]).await.unwrap(), "first");
        assert!(matches!(mock.complete(&[]).await, Err(LlmError::Api(_))));
        assert!(mock.complete(&[]).await.unwrap().contains("dimension_scores"));
        assert_eq!(mock.calls(), 3);
    }
}
