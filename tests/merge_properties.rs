//! Property tests for the three-way merge: set-field commutativity and
//! output determinism.

use beads_git::model::{Dependency, DependencyType, Issue};
use beads_git::sync::merge::merge_maps;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;

fn issue_with(id: &str, labels: Vec<String>, deps: Vec<String>, updated: i64) -> Issue {
    let mut issue = Issue::new(id, format!("Issue {id}"), Utc.timestamp_opt(1_000, 0).unwrap());
    issue.updated_at = Utc.timestamp_opt(updated, 0).unwrap();
    issue.labels = labels;
    issue.labels.sort();
    issue.labels.dedup();
    issue.dependencies = deps
        .into_iter()
        .map(|target| Dependency {
            issue_id: id.to_string(),
            depends_on_id: target,
            dep_type: DependencyType::Blocks,
            created_at: Utc.timestamp_opt(1_000, 0).unwrap(),
            created_by: None,
        })
        .collect();
    issue
}

fn label_set() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z]{1,8}", 0..5)
}

fn dep_set() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("bd-[a-z0-9]{3,6}", 0..4)
}

proptest! {
    /// merge(B, L, R) and merge(B, R, L) agree on set-valued fields.
    #[test]
    fn set_fields_commute(
        base_labels in label_set(),
        l_labels in label_set(),
        r_labels in label_set(),
        l_deps in dep_set(),
        r_deps in dep_set(),
        l_updated in 2_000i64..5_000,
        r_updated in 2_000i64..5_000,
    ) {
        let base = issue_with("bd-aaa111", base_labels, vec![], 1_500);
        let left = issue_with("bd-aaa111", l_labels, l_deps, l_updated);
        let right = issue_with("bd-aaa111", r_labels, r_deps, r_updated);

        let map = |issue: &Issue| {
            let mut m = HashMap::new();
            m.insert(issue.id.clone(), issue.clone());
            m
        };

        let lr = merge_maps(&map(&base), &map(&left), &map(&right));
        let rl = merge_maps(&map(&base), &map(&right), &map(&left));

        prop_assert_eq!(&lr.merged[0].labels, &rl.merged[0].labels);

        let dep_targets = |issue: &Issue| {
            let mut targets: Vec<String> = issue
                .dependencies
                .iter()
                .map(|d| d.depends_on_id.clone())
                .collect();
            targets.sort();
            targets
        };
        prop_assert_eq!(dep_targets(&lr.merged[0]), dep_targets(&rl.merged[0]));

        // monotone fields commute too
        prop_assert_eq!(lr.merged[0].updated_at, rl.merged[0].updated_at);
    }

    /// Output order is ascending by ID regardless of input order.
    #[test]
    fn output_is_sorted(ids in proptest::collection::hash_set("bd-[a-z0-9]{3,6}", 1..10)) {
        let ours: HashMap<String, Issue> = ids
            .iter()
            .map(|id| (id.clone(), issue_with(id, vec![], vec![], 2_000)))
            .collect();
        let outcome = merge_maps(&HashMap::new(), &ours, &HashMap::new());
        let output_ids: Vec<&str> = outcome.merged.iter().map(|i| i.id.as_str()).collect();
        let mut sorted = output_ids.clone();
        sorted.sort_unstable();
        prop_assert_eq!(output_ids, sorted);
    }
}
