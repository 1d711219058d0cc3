//! Property tests over ID arithmetic, scoring and filtering

use chrono::Duration;
use proptest::prelude::*;
use std::collections::HashSet;

use obscura::models::{MediaRecord, QueryFilters, SourceKind};
use obscura::probe::{id_from_number, id_to_number, neighbors, ID_SPACE};
use obscura::scoring::ObscurityScorer;
use obscura::search::filter_matches;

use crate::common::{fixed_now, vid};

proptest! {
    #[test]
    fn neighbors_are_distinct_and_exclude_seed(n in 0u128..ID_SPACE, k in 1usize..64) {
        let seed = id_from_number(n);
        let ids = neighbors(&seed, k);

        prop_assert_eq!(ids.len(), 2 * k);
        let unique: HashSet<_> = ids.iter().cloned().collect();
        prop_assert_eq!(unique.len(), 2 * k);
        prop_assert!(!unique.contains(&seed));
    }

    #[test]
    fn id_numbers_survive_conversion(n in 0u128..ID_SPACE) {
        prop_assert_eq!(id_to_number(&id_from_number(n)), n);
    }

    #[test]
    fn score_is_bounded_and_deterministic(
        views in 0u64..10_000_000,
        likes in 0u64..1_000,
        age_days in 0i64..10_000,
        default_name in any::<bool>(),
    ) {
        let title = if default_name { "IMG_4821" } else { "summer at the lake" };
        let record = MediaRecord::video(vid(1), SourceKind::Api)
            .with_title(title)
            .with_views(views)
            .with_engagement(likes, 0)
            .with_uploaded_at(fixed_now() - Duration::days(age_days));
        let scorer = ObscurityScorer::default();

        let first = scorer.score(&record, fixed_now());
        prop_assert!(first <= 100);
        prop_assert_eq!(first, scorer.score(&record, fixed_now()));
    }

    #[test]
    fn exact_zero_admits_only_unwatched(views in 0u64..50) {
        let record = MediaRecord::video(vid(2), SourceKind::Scrape).with_views(views);
        let filters = QueryFilters {
            exact_zero: true,
            ..QueryFilters::default()
        };

        let matched = filter_matches(&record, &filters, fixed_now(), 10);
        prop_assert_eq!(matched.is_some(), views == 0);
    }
}
