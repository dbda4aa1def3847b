//! 建议优先级排序
//!
//! 纯函数：按 impact / max(effort, 1) 降序；平局时 impact 高者优先，再按维度枚举顺序。
//! 为保证全序，最后依次比较 effort、title、description；从不依赖输入顺序。

use std::cmp::Ordering;

use crate::refine::types::Recommendation;

/// 两条建议的优先级比较（Less 表示 a 排在前面）
pub fn compare_priority(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.priority_ratio()
        .total_cmp(&a.priority_ratio())
        .then_with(|| b.impact.total_cmp(&a.impact))
        .then_with(|| a.dimension.cmp(&b.dimension))
        .then_with(|| a.effort.total_cmp(&b.effort))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.description.cmp(&b.description))
}

/// 返回排序后的副本，不修改输入
pub fn prioritize(recommendations: &[Recommendation]) -> Vec<Recommendation> {
    let mut ordered = recommendations.to_vec();
    ordered.sort_by(compare_priority);
    ordered
}

/// 从已排序列表中取本轮要应用的前 budget 条
pub fn select_batch(prioritized: &[Recommendation], budget: usize) -> Vec<Recommendation> {
    prioritized.iter().take(budget).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::types::Dimension;

    fn rec(dimension: Dimension, title: &str, impact: f64, effort: f64) -> Recommendation {
        Recommendation::new(dimension, title, impact, effort)
    }

    #[test]
    fn test_orders_by_ratio_descending() {
        let input = vec![
            rec(Dimension::Typography, "a", 4.0, 4.0),
            rec(Dimension::Typography, "b", 9.0, 3.0),
            rec(Dimension::Typography, "c", 6.0, 1.0),
        ];
        let titles: Vec<_> = prioritize(&input).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_tie_prefers_higher_impact() {
        // 同为 2.0
        let input = vec![
            rec(Dimension::Typography, "small", 4.0, 2.0),
            rec(Dimension::Typography, "large", 8.0, 4.0),
        ];
        let ordered = prioritize(&input);
        assert_eq!(ordered[0].title, "large");
    }

    #[test]
    fn test_tie_then_dimension_order_not_insertion_order() {
        let a = rec(Dimension::Accessibility, "focus", 6.0, 3.0);
        let b = rec(Dimension::VisualHierarchy, "headline", 6.0, 3.0);
        let forward = prioritize(&[a.clone(), b.clone()]);
        let backward = prioritize(&[b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].dimension, Dimension::VisualHierarchy);
    }

    #[test]
    fn test_effort_floor_of_one() {
        let input = vec![
            rec(Dimension::Typography, "ratio six", 6.0, 1.0),
            rec(Dimension::Typography, "sub-one effort", 6.0, 0.25),
        ];
        let ordered = prioritize(&input);
        // 比值相同（6.0），impact 相同、维度相同，effort 低者在前
        assert_eq!(ordered[0].title, "sub-one effort");
        assert_eq!(ordered[0].priority_ratio(), ordered[1].priority_ratio());
    }

    #[test]
    fn test_input_untouched_and_fields_preserved() {
        let input = vec![
            rec(Dimension::Typography, "a", 2.0, 8.0),
            rec(Dimension::ColorContrast, "b", 9.0, 1.0).with_description("raise contrast"),
        ];
        let snapshot = input.clone();
        let ordered = prioritize(&input);
        assert_eq!(input, snapshot);
        assert_eq!(ordered[0].description, "raise contrast");
        assert_eq!(ordered.len(), input.len());
    }

    #[test]
    fn test_non_increasing_ratio_and_deterministic() {
        let dims = Dimension::ALL;
        let input: Vec<_> = (0..40)
            .map(|i| {
                let impact = ((i * 7) % 10 + 1) as f64;
                let effort = ((i * 3) % 10 + 1) as f64;
                rec(dims[i % dims.len()], &format!("r{}", i), impact, effort)
            })
            .collect();
        let first = prioritize(&input);
        assert!(first
            .windows(2)
            .all(|w| w[0].priority_ratio() >= w[1].priority_ratio()));

        let mut reversed = input.clone();
        reversed.reverse();
        assert_eq!(prioritize(&reversed), first);
    }

    #[test]
    fn test_select_batch_respects_budget() {
        let input: Vec<_> = (0..5)
            .map(|i| rec(Dimension::Typography, &format!("r{}", i), 5.0, 1.0 + i as f64))
            .collect();
        let ordered = prioritize(&input);
        let batch = select_batch(&ordered, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].title, "r0");
        assert_eq!(select_batch(&ordered, 10).len(), 5);
    }
}
