//! UI 迭代优化核心：数据模型、评分细则、优先级排序、编排器与报告

pub mod engine;
pub mod persist;
pub mod prioritizer;
pub mod report;
pub mod rubric;
pub mod types;

pub use engine::{reconcile_outcomes, RefineConfig, RefineLoop};
pub use persist::ReportWriter;
pub use prioritizer::{compare_priority, prioritize, select_batch};
pub use report::{Report, ReportBuilder, ReportSummary, TerminationReason};
pub use rubric::{Assessment, DimensionGain, ImprovementBand, Rubric, DEFAULT_WEIGHTS};
pub use types::{
    ApplyOutcome, DesignSpec, Dimension, ImageFormat, Issue, IterationRecord, Recommendation,
    Screenshot, Severity,
};
