//! 报告落盘
//!
//! 目录结构：
//! ```text
//! <output_dir>/
//!   iteration_0/screenshot.png
//!   iteration_0/evaluation.json
//!   ...
//!   final_report.md
//!   report.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::refine::report::Report;
use crate::refine::rubric::Rubric;

pub struct ReportWriter {
    root: PathBuf,
}

impl ReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 写出整次运行；返回 final_report.md 的路径
    pub async fn write(&self, report: &Report, rubric: &Rubric) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root).await?;

        for record in report.records() {
            let dir = self.root.join(format!("iteration_{}", record.iteration));
            fs::create_dir_all(&dir).await?;

            if let Some(shot) = &record.screenshot {
                if !shot.payload.is_empty() {
                    let path = dir.join(format!("screenshot.{}", shot.format.extension()));
                    fs::write(&path, &shot.payload).await?;
                }
            }
            if let Some(spec) = &record.spec {
                let json = serde_json::to_string_pretty(spec).map_err(io::Error::other)?;
                fs::write(dir.join("evaluation.json"), json).await?;
            }
        }

        let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
        fs::write(self.root.join("report.json"), json).await?;

        let md_path = self.root.join("final_report.md");
        fs::write(&md_path, report.to_markdown(rubric)).await?;

        tracing::info!(path = %md_path.display(), "report written");
        Ok(md_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::report::{ReportBuilder, TerminationReason};
    use crate::refine::types::{DesignSpec, Dimension, IterationRecord, Screenshot};
    use chrono::Utc;

    #[tokio::test]
    async fn test_write_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ReportBuilder::new(8.5);
        let spec = DesignSpec {
            iteration: 0,
            timestamp: Utc::now(),
            dimension_scores: Dimension::ALL.into_iter().map(|d| (d, 9.0)).collect(),
            current_score: 9.0,
            issues: vec![],
            recommendations: vec![],
            raw_recommendations: Vec::new(),
            estimated_score_after: 9.0,
            summary: Some("clean".into()),
        };
        let shot = Screenshot::new(vec![0x89, b'P', b'N', b'G', 1, 2, 3], 1440, 900, "page.png");
        builder.append(IterationRecord::evaluated(0, shot, spec));
        let report = builder.finish(TerminationReason::TargetReached, None);

        let writer = ReportWriter::new(dir.path().join("run"));
        let md = writer.write(&report, &Rubric::default()).await.unwrap();

        assert!(md.ends_with("final_report.md"));
        let root = dir.path().join("run");
        assert!(root.join("iteration_0/screenshot.png").exists());
        assert!(root.join("iteration_0/evaluation.json").exists());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(root.join("report.json")).unwrap()).unwrap();
        assert_eq!(json["termination"], "TARGET_REACHED");
        let md = std::fs::read_to_string(md).unwrap();
        assert!(md.contains("# UI Refinement Report"));
    }
}
