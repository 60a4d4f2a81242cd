//! Property tests for hash-based ID generation.

use beads_git::util::id::{
    IdGenerator, MAX_HASH_LENGTH, MIN_HASH_LENGTH, id_hash, is_valid_id, next_child_index,
    parse_id,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;

fn title_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?-]{1,60}"
}

proptest! {
    #[test]
    fn generated_ids_are_always_legal(
        title in title_strategy(),
        desc in proptest::option::of("[a-z ]{0,40}"),
        creator in proptest::option::of("[a-z]{1,12}"),
        secs in 0i64..2_000_000_000,
    ) {
        let generator = IdGenerator::with_prefix("bd");
        let created_at = Utc.timestamp_opt(secs, 0).unwrap();
        let id = generator
            .generate(&title, desc.as_deref(), creator.as_deref(), created_at, 0, |_| false)
            .unwrap();
        prop_assert!(is_valid_id(&id), "illegal id: {id}");
        let parsed = parse_id(&id).unwrap();
        prop_assert_eq!(parsed.prefix, "bd");
        prop_assert!(parsed.hash.len() >= MIN_HASH_LENGTH);
        prop_assert!(parsed.hash.len() <= MAX_HASH_LENGTH);
    }

    #[test]
    fn generation_is_deterministic(
        title in title_strategy(),
        secs in 0i64..2_000_000_000,
    ) {
        let generator = IdGenerator::with_prefix("bd");
        let created_at = Utc.timestamp_opt(secs, 0).unwrap();
        let a = generator.generate(&title, None, Some("alice"), created_at, 0, |_| false).unwrap();
        let b = generator.generate(&title, None, Some("alice"), created_at, 0, |_| false).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn hash_output_shape(input in ".{0,100}", len in MIN_HASH_LENGTH..=MAX_HASH_LENGTH) {
        let hash = id_hash(&input, len);
        prop_assert_eq!(hash.len(), len);
        prop_assert!(hash.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn child_index_is_one_plus_max(existing in proptest::collection::vec(1u32..50, 0..10)) {
        let ids: Vec<String> = existing.iter().map(|k| format!("bd-abc123.{k}")).collect();
        let next = next_child_index("bd-abc123", ids.iter().map(String::as_str));
        let expected = existing.iter().max().map_or(1, |max| max + 1);
        prop_assert_eq!(next, expected);
    }
}

/// Distinct creation tuples produce distinct IDs with overwhelming
/// probability; a batch of 200 distinct titles must not collide at the
/// starting length once the collision ladder kicks in.
#[test]
fn distinct_tuples_rarely_collide() {
    let generator = IdGenerator::with_prefix("bd");
    let created_at = Utc.timestamp_opt(1_714_557_600, 0).unwrap();
    let mut seen: HashSet<String> = HashSet::new();
    for i in 0..200 {
        let id = generator
            .generate(
                &format!("Issue number {i}"),
                None,
                Some("alice"),
                created_at,
                seen.len(),
                |candidate| seen.contains(candidate),
            )
            .unwrap();
        assert!(seen.insert(id));
    }
    assert_eq!(seen.len(), 200);
}
