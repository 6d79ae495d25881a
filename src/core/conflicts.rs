//! Conflict detection across task conclusions.
//!
//! Each task's action on a subject maps onto a three-way stance. A subject
//! is in conflict when at least one task is favorable and at least one is
//! unfavorable.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{Conflict, Recommendation, Stance, TaskId, TaskResult};

/// Every task's position on every subject it mentioned.
///
/// A task that mentions a subject more than once contributes only its
/// highest-confidence recommendation. Failed results are ignored.
pub fn positions_by_subject(
    outputs: &HashMap<TaskId, TaskResult>,
) -> BTreeMap<String, BTreeMap<TaskId, Recommendation>> {
    let mut positions: BTreeMap<String, BTreeMap<TaskId, Recommendation>> = BTreeMap::new();

    for (task_id, result) in outputs.iter().filter(|(_, r)| r.is_success()) {
        for rec in &result.recommendations {
            let by_task = positions.entry(rec.subject.clone()).or_default();
            match by_task.get(task_id) {
                Some(existing) if existing.confidence >= rec.confidence => {}
                _ => {
                    by_task.insert(task_id.clone(), rec.clone());
                }
            }
        }
    }

    positions
}

/// Severity grows with how evenly the disagreement is split
fn severity(favorable: usize, unfavorable: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (2.0 * favorable.min(unfavorable) as f64 / total as f64).min(1.0)
}

/// Find subjects with material disagreement, sorted by subject
pub fn detect_conflicts(outputs: &HashMap<TaskId, TaskResult>) -> Vec<Conflict> {
    positions_by_subject(outputs)
        .into_iter()
        .filter_map(|(subject, by_task)| {
            let mut favorable = BTreeSet::new();
            let mut unfavorable = BTreeSet::new();
            let mut neutral = BTreeSet::new();

            for (task_id, rec) in by_task {
                match rec.action.stance() {
                    Stance::Favorable => favorable.insert(task_id),
                    Stance::Unfavorable => unfavorable.insert(task_id),
                    Stance::Neutral => neutral.insert(task_id),
                };
            }

            if favorable.is_empty() || unfavorable.is_empty() {
                return None;
            }

            let total = favorable.len() + unfavorable.len() + neutral.len();
            Some(Conflict {
                severity: severity(favorable.len(), unfavorable.len(), total),
                subject,
                favorable,
                unfavorable,
                neutral,
                resolution: String::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;

    fn result(task: &str, recs: &[(&str, Action, f64)]) -> (TaskId, TaskResult) {
        let id = TaskId::from(task);
        let mut r = TaskResult::success(id.clone(), task, 0.7);
        for (subject, action, confidence) in recs {
            r = r.with_recommendation(Recommendation::new(*subject, *action, *confidence));
        }
        (id, r)
    }

    #[test]
    fn test_opposing_stances_conflict() {
        let outputs: HashMap<_, _> = [
            result("technical", &[("X", Action::Buy, 0.8)]),
            result("fundamental", &[("X", Action::Sell, 0.6)]),
        ]
        .into_iter()
        .collect();

        let conflicts = detect_conflicts(&outputs);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].subject, "X");
        assert_eq!(conflicts[0].favorable.len(), 1);
        assert_eq!(conflicts[0].unfavorable.len(), 1);
        assert!(conflicts[0].severity > 0.0);
        assert!(conflicts[0].resolution.is_empty());
    }

    #[test]
    fn test_neutral_does_not_conflict() {
        let outputs: HashMap<_, _> = [
            result("technical", &[("X", Action::StrongBuy, 0.8), ("Y", Action::Sell, 0.5)]),
            result("fundamental", &[("X", Action::Hold, 0.6), ("Y", Action::StrongSell, 0.5)]),
            result("news", &[("Y", Action::Hold, 0.4)]),
        ]
        .into_iter()
        .collect();

        assert!(detect_conflicts(&outputs).is_empty());
    }

    #[test]
    fn test_severity_tracks_balance() {
        assert_eq!(severity(1, 1, 2), 1.0);
        assert!(severity(1, 3, 4) < severity(2, 2, 4));
        assert!(severity(1, 1, 3) < severity(1, 1, 2));
        assert_eq!(severity(0, 0, 0), 0.0);
    }

    #[test]
    fn test_highest_confidence_mention_wins() {
        let outputs: HashMap<_, _> = [result(
            "technical",
            &[("X", Action::Sell, 0.3), ("X", Action::Buy, 0.9)],
        )]
        .into_iter()
        .collect();

        let positions = positions_by_subject(&outputs);
        assert_eq!(positions["X"][&TaskId::from("technical")].action, Action::Buy);
        assert!(detect_conflicts(&outputs).is_empty());
    }
}
