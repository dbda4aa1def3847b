//! 运行报告
//!
//! ReportBuilder 在运行开始时创建，每轮结束后 append 一条 IterationRecord（只追加，不回改），
//! 循环终止时 finish 产出不可变的 Report（分数轨迹、应用统计、耗时、终止原因）。

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::StageError;
use crate::refine::rubric::{self, Assessment, Rubric};
use crate::refine::types::{Dimension, IterationRecord};

/// 循环终止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    TargetReached,
    BudgetExhausted,
    Cancelled,
    Error,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::TargetReached => "TARGET_REACHED",
            TerminationReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            TerminationReason::Cancelled => "CANCELLED",
            TerminationReason::Error => "ERROR",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 汇总统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub iterations: usize,
    pub score_trajectory: Vec<f64>,
    pub start_score: Option<f64>,
    pub best_score: Option<f64>,
    pub best_iteration: Option<usize>,
    /// 最终分 - 初始分
    pub improvement: f64,
    pub total_attempted: usize,
    pub total_applied: usize,
    pub total_failed: usize,
}

impl ReportSummary {
    fn from_records(records: &[IterationRecord]) -> Self {
        let scored: Vec<(usize, f64)> = records
            .iter()
            .filter_map(|r| r.score().map(|s| (r.iteration, s)))
            .collect();
        let score_trajectory: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
        let best = scored
            .iter()
            .copied()
            .fold(None::<(usize, f64)>, |best, (i, s)| match best {
                Some((_, b)) if b >= s => best,
                _ => Some((i, s)),
            });
        let start_score = score_trajectory.first().copied();
        let improvement = match (start_score, score_trajectory.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        let total_attempted = records.iter().map(|r| r.outcomes.len()).sum();
        let total_applied = records.iter().map(|r| r.applied_count()).sum();

        Self {
            iterations: records.len(),
            score_trajectory,
            start_score,
            best_score: best.map(|(_, s)| s),
            best_iteration: best.map(|(i, _)| i),
            improvement,
            total_attempted,
            total_applied,
            total_failed: total_attempted - total_applied,
        }
    }
}

/// 运行期间的报告累加器（编排器独占）
pub struct ReportBuilder {
    run_id: Uuid,
    target_score: f64,
    started_at: DateTime<Utc>,
    clock: Instant,
    records: Vec<IterationRecord>,
}

impl ReportBuilder {
    pub fn new(target_score: f64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target_score,
            started_at: Utc::now(),
            clock: Instant::now(),
            records: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    /// 最近一条有分数的记录的分数
    pub fn last_score(&self) -> Option<f64> {
        self.records.iter().rev().find_map(|r| r.score())
    }

    /// 追加一条记录；score_delta 相对上一条有分数的记录计算
    pub fn append(&mut self, mut record: IterationRecord) {
        if let (Some(score), Some(previous)) = (record.score(), self.last_score()) {
            record.score_delta = score - previous;
        }
        self.records.push(record);
    }

    pub fn finish(self, termination: TerminationReason, error: Option<StageError>) -> Report {
        let summary = ReportSummary::from_records(&self.records);
        let final_score = self.records.iter().rev().find_map(|r| r.score());
        Report {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            target_score: self.target_score,
            final_score,
            reached: termination == TerminationReason::TargetReached,
            elapsed_ms: self.clock.elapsed().as_millis() as u64,
            termination,
            error,
            summary,
            records: self.records,
        }
    }
}

/// 终态报告（不可变；字段只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    target_score: f64,
    final_score: Option<f64>,
    reached: bool,
    elapsed_ms: u64,
    termination: TerminationReason,
    error: Option<StageError>,
    summary: ReportSummary,
    records: Vec<IterationRecord>,
}

impl Report {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn records(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn final_score(&self) -> Option<f64> {
        self.final_score
    }

    pub fn target_score(&self) -> f64 {
        self.target_score
    }

    pub fn reached(&self) -> bool {
        self.reached
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn termination(&self) -> TerminationReason {
        self.termination
    }

    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    pub fn summary(&self) -> &ReportSummary {
        &self.summary
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 渲染 Markdown 终态报告
    pub fn to_markdown(&self, rubric: &Rubric) -> String {
        let s = &self.summary;
        let start = s.start_score.unwrap_or(0.0);
        let final_score = self.final_score.unwrap_or(0.0);

        let mut out = String::from("# UI Refinement Report\n\n");
        out.push_str(&format!(
            "Generated: {}\n\nRun: `{}`\n\n",
            self.finished_at.format("%Y-%m-%d %H:%M:%S"),
            self.run_id
        ));

        out.push_str("## Executive Summary\n\n");
        out.push_str(&format!("- **Starting Score:** {:.1}/10\n", start));
        out.push_str(&format!(
            "- **Final Score:** {:.1}/10 ({})\n",
            final_score,
            Assessment::of(final_score).label()
        ));
        out.push_str(&format!("- **Improvement:** {:+.1} points\n", s.improvement));
        out.push_str(&format!("- **Iterations Completed:** {}\n", s.iterations));
        out.push_str(&format!("- **Target Score:** {:.1}/10\n", self.target_score));
        out.push_str(&format!(
            "- **Target Reached:** {}\n",
            if self.reached { "YES" } else { "NO" }
        ));
        if let Some(best) = s.best_iteration {
            out.push_str(&format!("- **Best Iteration:** {}\n", best));
        }
        out.push_str(&format!("- **Termination:** {}\n", self.termination));
        out.push_str(&format!(
            "- **Recommendations Applied:** {}/{}\n",
            s.total_applied, s.total_attempted
        ));
        out.push_str(&format!(
            "- **Elapsed:** {:.1}s\n",
            self.elapsed_ms as f64 / 1000.0
        ));
        if let Some(err) = &self.error {
            out.push_str(&format!("- **Error:** {}\n", err));
        }

        out.push_str("\n## Score Progression\n\n| Iteration | Composite |");
        for d in Dimension::ALL {
            out.push_str(&format!(" {} |", d.title()));
        }
        out.push_str("\n|---|---|");
        for _ in Dimension::ALL {
            out.push_str("---|");
        }
        out.push('\n');
        for record in &self.records {
            match &record.spec {
                Some(spec) => {
                    out.push_str(&format!("| {} | {:.1} |", record.iteration, spec.current_score));
                    for d in Dimension::ALL {
                        match spec.score_for(d) {
                            Some(v) => out.push_str(&format!(" {:.1} |", v)),
                            None => out.push_str(" - |"),
                        }
                    }
                }
                None => {
                    out.push_str(&format!("| {} | error |", record.iteration));
                    for _ in Dimension::ALL {
                        out.push_str(" - |");
                    }
                }
            }
            out.push('\n');
        }

        out.push_str("\n## Iteration History\n\n");
        for record in &self.records {
            out.push_str(&format!("### Iteration {}\n\n", record.iteration));
            if let Some(spec) = &record.spec {
                out.push_str(&format!("**Timestamp:** {}\n\n", spec.timestamp.to_rfc3339()));
                out.push_str(&format!("**Composite Score:** {:.1}/10\n\n", spec.current_score));
                if record.score_delta != 0.0 {
                    out.push_str(&format!("**Score Delta:** {:+.1}\n\n", record.score_delta));
                }
                out.push_str(&format!(
                    "**Issues:** {}  **Recommendations:** {}\n\n",
                    spec.issues.len(),
                    spec.recommendations.len()
                ));
            }
            if !record.outcomes.is_empty() {
                out.push_str("**Applied Changes:**\n");
                for outcome in &record.outcomes {
                    let mark = if outcome.applied { "x" } else { " " };
                    out.push_str(&format!(
                        "- [{}] {} ({}, impact {:.0} / effort {:.0})",
                        mark,
                        outcome.recommendation.title,
                        outcome.recommendation.dimension,
                        outcome.recommendation.impact,
                        outcome.recommendation.effort
                    ));
                    if let Some(reason) = &outcome.reason {
                        out.push_str(&format!(" - {}", reason));
                    }
                    out.push('\n');
                }
                out.push('\n');
            }
            if let Some(err) = &record.error {
                out.push_str(&format!("**Error:** {}\n\n", err));
            }
            out.push_str(&format!("**Duration:** {} ms\n\n---\n\n", record.duration_ms));
        }

        if let Some(last) = self.records.iter().rev().find_map(|r| r.spec.as_ref()) {
            let gains = rubric.priority_improvements(&last.dimension_scores, self.target_score);
            if !gains.is_empty() {
                out.push_str("## Priority Improvements\n\n");
                for gain in gains {
                    out.push_str(&format!(
                        "- **{}** ({:?}): {:.1}/10, potential gain {:.2} weighted points\n",
                        gain.dimension.title(),
                        gain.band,
                        gain.current_score,
                        gain.potential_gain
                    ));
                }
                out.push('\n');
            }
            let strong = rubric::strengths(&last.dimension_scores);
            if !strong.is_empty() {
                out.push_str("## Strengths\n\n");
                for (d, v) in strong {
                    out.push_str(&format!("- {}: {:.1}/10\n", d.title(), v));
                }
                out.push('\n');
            }
            let weak = rubric::weaknesses(&last.dimension_scores);
            if !weak.is_empty() {
                out.push_str("## Weaknesses\n\n");
                for (d, v) in weak {
                    out.push_str(&format!("- {}: {:.1}/10\n", d.title(), v));
                }
                out.push('\n');
            }
        }

        if !self.reached {
            let gap = (self.target_score - final_score).max(0.0);
            out.push_str(&format!(
                "## Remaining Gap\n\n**Gap to Target:** {:.1} points\n\n",
                gap
            ));
        }

        out
    }
}
