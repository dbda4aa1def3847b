//! 评分细则：维度权重表、综合分计算、评级与改进潜力
//!
//! 权重是显式常量表，可由配置 `[rubric.weights]` 覆盖。
//! `normalize = true`（默认）时综合分 = Σ(score·w) / Σw；
//! `normalize = false` 时综合分 = Σ(score·w) / N，并截断到 [0, 10]。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::core::ConfigError;
use crate::refine::types::Dimension;

/// 默认权重（合计 8.5）
pub const DEFAULT_WEIGHTS: [(Dimension, f64); 8] = [
    (Dimension::VisualHierarchy, 1.2),
    (Dimension::Typography, 1.0),
    (Dimension::ColorContrast, 1.0),
    (Dimension::SpacingLayout, 1.1),
    (Dimension::ComponentDesign, 1.0),
    (Dimension::AnimationInteraction, 0.9),
    (Dimension::Accessibility, 1.3),
    (Dimension::OverallAesthetic, 1.0),
];

const PRIORITY_IMPROVEMENT_LIMIT: usize = 5;
const STRENGTH_THRESHOLD: f64 = 7.0;
const WEAKNESS_THRESHOLD: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct Rubric {
    weights: BTreeMap<Dimension, f64>,
    normalize: bool,
}

impl Default for Rubric {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS.into_iter().collect(),
            normalize: true,
        }
    }
}

/// 分数评级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Assessment {
    Exceptional,
    Excellent,
    Good,
    Fair,
    NeedsImprovement,
    CriticalIssues,
}

impl Assessment {
    pub fn of(score: f64) -> Self {
        if score >= 9.0 {
            Assessment::Exceptional
        } else if score >= 8.0 {
            Assessment::Excellent
        } else if score >= 7.0 {
            Assessment::Good
        } else if score >= 6.0 {
            Assessment::Fair
        } else if score >= 4.0 {
            Assessment::NeedsImprovement
        } else {
            Assessment::CriticalIssues
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Assessment::Exceptional => "Exceptional",
            Assessment::Excellent => "Excellent",
            Assessment::Good => "Good",
            Assessment::Fair => "Fair",
            Assessment::NeedsImprovement => "Needs Improvement",
            Assessment::CriticalIssues => "Critical Issues",
        }
    }
}

/// 维度改进优先级档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImprovementBand {
    Critical,
    Important,
    Enhancement,
}

/// 某一维度提升到目标分的潜在加权收益
#[derive(Debug, Clone, Serialize)]
pub struct DimensionGain {
    pub dimension: Dimension,
    pub current_score: f64,
    pub potential_gain: f64,
    pub band: ImprovementBand,
}

impl Rubric {
    /// 以默认权重为基础，叠加配置中的覆盖值
    pub fn from_overrides(
        overrides: &HashMap<String, f64>,
        normalize: bool,
    ) -> Result<Self, ConfigError> {
        let mut rubric = Rubric {
            normalize,
            ..Rubric::default()
        };
        for (key, weight) in overrides {
            let dimension: Dimension = key
                .parse()
                .map_err(|_| ConfigError::UnknownDimension(key.clone()))?;
            if !(weight.is_finite() && *weight > 0.0) {
                return Err(ConfigError::Weight {
                    dimension: key.clone(),
                    weight: *weight,
                });
            }
            rubric.weights.insert(dimension, *weight);
        }
        Ok(rubric)
    }

    pub fn weight(&self, dimension: Dimension) -> f64 {
        self.weights.get(&dimension).copied().unwrap_or(1.0)
    }

    pub fn total_weight(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    fn denominator(&self) -> f64 {
        if self.normalize {
            self.total_weight()
        } else {
            self.weights.len() as f64
        }
    }

    /// 某维度在综合分中的占比
    pub fn share(&self, dimension: Dimension) -> f64 {
        self.weight(dimension) / self.denominator()
    }

    /// 由各维度子分计算综合分
    pub fn aggregate(&self, scores: &BTreeMap<Dimension, f64>) -> f64 {
        if scores.is_empty() {
            return 0.0;
        }
        let weighted_sum: f64 = scores.iter().map(|(d, s)| s * self.weight(*d)).sum();
        let denominator = if self.normalize {
            scores.keys().map(|d| self.weight(*d)).sum::<f64>()
        } else {
            scores.len() as f64
        };
        (weighted_sum / denominator).clamp(0.0, 10.0)
    }

    /// 低于目标分的维度，按潜在收益降序取前 5
    pub fn priority_improvements(
        &self,
        scores: &BTreeMap<Dimension, f64>,
        target: f64,
    ) -> Vec<DimensionGain> {
        let mut gains: Vec<DimensionGain> = scores
            .iter()
            .filter(|(_, score)| **score < target)
            .map(|(dimension, score)| DimensionGain {
                dimension: *dimension,
                current_score: *score,
                potential_gain: (target - score) * self.weight(*dimension),
                band: if *score < 6.0 {
                    ImprovementBand::Critical
                } else if *score < 7.5 {
                    ImprovementBand::Important
                } else {
                    ImprovementBand::Enhancement
                },
            })
            .collect();
        gains.sort_by(|a, b| {
            b.potential_gain
                .total_cmp(&a.potential_gain)
                .then_with(|| a.dimension.cmp(&b.dimension))
        });
        gains.truncate(PRIORITY_IMPROVEMENT_LIMIT);
        gains
    }
}

pub fn strengths(scores: &BTreeMap<Dimension, f64>) -> Vec<(Dimension, f64)> {
    scores
        .iter()
        .filter(|(_, s)| **s >= STRENGTH_THRESHOLD)
        .map(|(d, s)| (*d, *s))
        .collect()
}

pub fn weaknesses(scores: &BTreeMap<Dimension, f64>) -> Vec<(Dimension, f64)> {
    scores
        .iter()
        .filter(|(_, s)| **s < WEAKNESS_THRESHOLD)
        .map(|(d, s)| (*d, *s))
        .collect()
}
