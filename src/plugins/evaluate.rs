//! 视觉评估插件
//!
//! 提示词 = 评分细则（维度与权重）+ 回复 JSON Schema + 轮次信息（第二轮起附上上一轮分数与短板）；
//! 截图作为图片附件发送。回复交给 parse 模块解析与校验。

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::EvaluateError;
use crate::llm::{ImageAttachment, LlmClient, Message};
use crate::plugins::parse::{evaluation_schema, parse_evaluation};
use crate::plugins::EvaluatePlugin;
use crate::refine::rubric::weaknesses;
use crate::refine::{DesignSpec, Dimension, Rubric, Screenshot};

const SYSTEM_PROMPT: &str = "You are a senior product designer reviewing screenshots of a web UI. \
Score each design dimension from 0 to 10, list concrete issues, and propose recommendations \
with impact and effort estimates from 1 to 10. Answer with a single JSON object only.";

/// 上一轮评估的摘要（用于提示词）
#[derive(Debug, Clone)]
struct PreviousEvaluation {
    iteration: usize,
    score: f64,
    weaknesses: Vec<(Dimension, f64)>,
}

pub struct VisionEvaluator {
    llm: Arc<dyn LlmClient>,
    rubric: Rubric,
    target_score: f64,
    previous: Mutex<Option<PreviousEvaluation>>,
}

impl VisionEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, rubric: Rubric, target_score: f64) -> Self {
        Self {
            llm,
            rubric,
            target_score,
            previous: Mutex::new(None),
        }
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    fn build_prompt(&self, iteration: usize) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Evaluate this UI screenshot (iteration {}).", iteration);
        let _ = writeln!(prompt, "Target composite score: {:.1}/10.\n", self.target_score);
        prompt.push_str("Dimensions and weights:\n");
        for d in Dimension::ALL {
            let _ = writeln!(prompt, "- {} ({}): weight {:.1}", d.as_str(), d.title(), self.rubric.weight(d));
        }

        let previous = self.previous.lock().ok().and_then(|p| p.clone());
        if let Some(prev) = previous {
            let _ = writeln!(
                prompt,
                "\nPrevious evaluation (iteration {}) scored {:.1}/10.",
                prev.iteration, prev.score
            );
            if !prev.weaknesses.is_empty() {
                prompt.push_str("Weak dimensions last time: ");
                let list: Vec<String> = prev
                    .weaknesses
                    .iter()
                    .map(|(d, s)| format!("{} {:.1}", d.as_str(), s))
                    .collect();
                prompt.push_str(&list.join(", "));
                prompt.push_str(". Judge whether they improved.\n");
            }
        }

        prompt.push_str("\nRespond with JSON matching this schema:\n```json\n");
        prompt.push_str(&evaluation_schema());
        prompt.push_str("\n```\n");
        prompt
    }

    fn remember(&self, spec: &DesignSpec) {
        if let Ok(mut slot) = self.previous.lock() {
            *slot = Some(PreviousEvaluation {
                iteration: spec.iteration,
                score: spec.current_score,
                weaknesses: weaknesses(&spec.dimension_scores),
            });
        }
    }
}

#[async_trait]
impl EvaluatePlugin for VisionEvaluator {
    fn name(&self) -> &str {
        "vision_evaluator"
    }

    async fn evaluate(&self, screenshot: &Screenshot, iteration: usize) -> Result<DesignSpec, EvaluateError> {
        let messages = vec![
            Message::system(SYSTEM_PROMPT),
            Message::user(self.build_prompt(iteration)).with_image(ImageAttachment::from_screenshot(screenshot)),
        ];

        let raw = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| EvaluateError::unreachable(e.to_string()))?;
        tracing::debug!(
            preview = %raw.chars().take(200).collect::<String>(),
            "evaluation response"
        );

        let spec = parse_evaluation(&raw, iteration, &self.rubric)?;
        self.remember(&spec);
        Ok(spec)
    }
}
