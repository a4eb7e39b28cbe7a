//! Per file pruning decisions.
//!
//! Both checks are conservative: a file is only dropped when its partition
//! values or statistics prove that no row in it can satisfy the predicate.
//! Anything unknown, a missing bound, an unparseable value, an absent
//! statistics bundle, resolves to keeping the file.

use std::collections::HashMap;

use tracing::warn;

use crate::actions::FileStatistics;
use crate::predicate::{Datum, Domain, EffectivePredicate, ValueSet};

/// Whether a file's partition values can satisfy the predicate.
///
/// Only partition columns are consulted; a value missing from the map reads
/// as null. Expects canonical partition values and lower cased column names.
pub(crate) fn partition_matches_predicate(
    partition_columns: &[String],
    partition_values: &HashMap<String, Option<String>>,
    predicate: &EffectivePredicate,
) -> bool {
    let Some(domains) = predicate.domains() else {
        return false;
    };
    partition_columns.iter().all(|column| {
        domains.get(column).map_or(true, |domain| {
            let value = partition_values.get(column).and_then(|v| v.as_deref());
            partition_value_matches(column, value, domain)
        })
    })
}

fn partition_value_matches(column: &str, value: Option<&str>, domain: &Domain) -> bool {
    match value {
        None => domain.null_allowed(),
        Some(raw) => match domain.primitive_type() {
            // Type free domains admit every non null value or no non null
            // value at all.
            None => !matches!(domain.values(), ValueSet::None),
            Some(data_type) => match Datum::parse_partition_value(raw, data_type) {
                Some(datum) => domain.contains(&datum),
                None => {
                    warn!(column, value = raw, "unparseable partition value, keeping file");
                    true
                }
            },
        },
    }
}

/// Whether a file's column statistics can satisfy the predicate.
///
/// Partition columns are skipped here; [`partition_matches_predicate`] rules
/// on those from the authoritative partition values.
pub(crate) fn file_matches_predicate(
    statistics: Option<&FileStatistics>,
    partition_columns: &[String],
    predicate: &EffectivePredicate,
) -> bool {
    let Some(domains) = predicate.domains() else {
        return false;
    };
    let Some(stats) = statistics else {
        return true;
    };
    domains
        .iter()
        .filter(|(column, _)| !partition_columns.iter().any(|pc| pc == *column))
        .all(|(column, domain)| column_matches_statistics(column, domain, stats))
}

fn column_matches_statistics(column: &str, domain: &Domain, stats: &FileStatistics) -> bool {
    if domain.is_none() {
        return false;
    }

    // An absent map or an absent entry leaves nulls possible; only a
    // counted zero proves their absence.
    let may_contain_nulls = stats
        .null_counts
        .as_ref()
        .and_then(|counts| counts.get(column))
        .map_or(true, |count| *count > 0);

    if domain.is_only_null() {
        // Bounds say nothing about nulls.
        return may_contain_nulls;
    }

    let bounds = domain.primitive_type().and_then(|data_type| {
        let lower = Datum::decode_bound(stats.min_values.get(column)?, data_type)?;
        let upper = Datum::decode_bound(stats.max_values.get(column)?, data_type)?;
        Some((lower, upper))
    });
    match bounds {
        // An unknown bound can hide any value.
        None => true,
        Some((lower, upper)) if domain.overlaps_bounds(&lower, &upper) => true,
        // The bounds rule every allowed value out; possible nulls still
        // match a predicate that allows them.
        Some(_) => domain.null_allowed() && may_contain_nulls,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stats(
        min: serde_json::Value,
        max: serde_json::Value,
        null_count: i64,
    ) -> FileStatistics {
        FileStatistics {
            record_count: Some(100),
            min_values: HashMap::from([("c".to_string(), min)]),
            max_values: HashMap::from([("c".to_string(), max)]),
            null_counts: Some(HashMap::from([("c".to_string(), null_count)])),
        }
    }

    fn fixed(value: i64) -> EffectivePredicate {
        EffectivePredicate::all().with_domain("c", Domain::single_value(Datum::Long(value)))
    }

    fn long_range(low: i64, high: i64, null_allowed: bool) -> EffectivePredicate {
        EffectivePredicate::all().with_domain(
            "c",
            Domain::range(Some(Datum::Long(low)), Some(Datum::Long(high)))
                .with_null_allowed(null_allowed),
        )
    }

    fn matches_stats(statistics: &FileStatistics, predicate: &EffectivePredicate) -> bool {
        file_matches_predicate(Some(statistics), &[], predicate)
    }

    #[test]
    fn partition_pruning_on_long_column() {
        let columns = vec!["c".to_string()];
        let values = HashMap::from([("c".to_string(), Some("1000".to_string()))]);

        assert!(!partition_matches_predicate(&columns, &values, &fixed(100)));
        assert!(partition_matches_predicate(&columns, &values, &fixed(1000)));
        let only_null = EffectivePredicate::all().with_domain("c", Domain::only_null());
        assert!(!partition_matches_predicate(&columns, &values, &only_null));
    }

    #[test]
    fn null_partition_value_needs_null_allowed() {
        let columns = vec!["c".to_string()];
        let values = HashMap::from([("c".to_string(), None)]);

        assert!(!partition_matches_predicate(&columns, &values, &fixed(1)));
        let only_null = EffectivePredicate::all().with_domain("c", Domain::only_null());
        assert!(partition_matches_predicate(&columns, &values, &only_null));
        // a column missing from the map reads as null
        assert!(!partition_matches_predicate(&columns, &HashMap::new(), &fixed(1)));
    }

    #[test]
    fn unparseable_partition_value_keeps_file() {
        let columns = vec!["c".to_string()];
        let values = HashMap::from([("c".to_string(), Some("not-a-number".to_string()))]);
        assert!(partition_matches_predicate(&columns, &values, &fixed(1)));
    }

    #[test]
    fn unconstrained_partition_column_matches() {
        let columns = vec!["c".to_string()];
        let values = HashMap::from([("c".to_string(), Some("1000".to_string()))]);
        assert!(partition_matches_predicate(&columns, &values, &EffectivePredicate::all()));
        let other =
            EffectivePredicate::all().with_domain("d", Domain::single_value(Datum::Long(1)));
        assert!(partition_matches_predicate(&columns, &values, &other));
    }

    #[test]
    fn none_predicate_matches_nothing() {
        let columns = vec!["c".to_string()];
        let values = HashMap::from([("c".to_string(), Some("1000".to_string()))]);
        let none = EffectivePredicate::none();
        assert!(!partition_matches_predicate(&columns, &values, &none));
        assert!(!file_matches_predicate(None, &[], &none));
    }

    #[test]
    fn statistics_pruning_on_long_bounds() {
        let file = stats(json!(1000), json!(2000), 0);

        assert!(!matches_stats(&file, &fixed(0)));
        assert!(matches_stats(&file, &fixed(1000)));
        assert!(matches_stats(&file, &fixed(1500)));
        assert!(matches_stats(&file, &fixed(2000)));
        assert!(!matches_stats(&file, &fixed(3000)));
    }

    #[test]
    fn disjoint_range_rescued_only_by_counted_nulls() {
        assert!(!matches_stats(&stats(json!(1000), json!(2000), 0), &long_range(0, 100, true)));
        assert!(matches_stats(&stats(json!(1000), json!(2000), 1), &long_range(0, 100, true)));
        assert!(!matches_stats(&stats(json!(1000), json!(2000), 0), &long_range(0, 100, false)));
        assert!(!matches_stats(&stats(json!(1000), json!(2000), 1), &long_range(0, 100, false)));
    }

    #[test]
    fn overlapping_ranges_match() {
        assert!(matches_stats(&stats(json!(1000), json!(2000), 0), &long_range(1001, 1002, false)));
        assert!(matches_stats(&stats(json!(1000), json!(2000), 1), &long_range(1001, 1002, false)));
        assert!(matches_stats(&stats(json!(1000), json!(2000), 0), &long_range(990, 1010, false)));
        assert!(matches_stats(&stats(json!(1000), json!(2000), 1), &long_range(990, 1010, false)));
    }

    #[test]
    fn missing_bound_maps_keep_file() {
        let mut no_lower = stats(json!(0), json!(2000), 0);
        no_lower.min_values.clear();
        assert!(matches_stats(&no_lower, &fixed(0)));

        let mut no_upper = stats(json!(-1000), json!(0), 0);
        no_upper.max_values.clear();
        assert!(matches_stats(&no_upper, &fixed(0)));
    }

    #[test]
    fn undecodable_bound_keeps_file() {
        assert!(matches_stats(&stats(json!("oops"), json!(2000), 0), &fixed(0)));
        assert!(matches_stats(&stats(json!(1000), json!(null), 0), &fixed(0)));
    }

    #[test]
    fn only_null_predicate_follows_null_counts() {
        let only_null = EffectivePredicate::all().with_domain("c", Domain::only_null());

        let mut file = stats(json!(1000), json!(2000), 0);
        file.null_counts = None;
        assert!(matches_stats(&file, &only_null));
        file.null_counts = Some(HashMap::new());
        assert!(matches_stats(&file, &only_null));
        file.null_counts = Some(HashMap::from([("other".to_string(), 0)]));
        assert!(matches_stats(&file, &only_null));
        assert!(!matches_stats(&stats(json!(1000), json!(2000), 0), &only_null));
        assert!(matches_stats(&stats(json!(1000), json!(2000), 3), &only_null));
    }

    #[test]
    fn uncounted_nulls_rescue_disjoint_range_when_allowed() {
        // map present without an entry, map absent, map empty: all leave
        // nulls possible
        let mut file = stats(json!(1000), json!(2000), 0);
        file.null_counts = Some(HashMap::from([("other".to_string(), 0)]));
        assert!(matches_stats(&file, &long_range(0, 100, true)));
        file.null_counts = None;
        assert!(matches_stats(&file, &long_range(0, 100, true)));
        file.null_counts = Some(HashMap::new());
        assert!(matches_stats(&file, &long_range(0, 100, true)));
        // but never a predicate that disallows null
        assert!(!matches_stats(&file, &long_range(0, 100, false)));
    }

    #[test]
    fn absent_statistics_bundle_matches_any_predicate() {
        assert!(file_matches_predicate(None, &[], &fixed(0)));
        let only_null = EffectivePredicate::all().with_domain("c", Domain::only_null());
        assert!(file_matches_predicate(None, &[], &only_null));
    }

    #[test]
    fn partition_columns_are_skipped_in_statistics_match() {
        // bounds would exclude the value, but the column is a partition
        // column so statistics are not consulted
        let file = stats(json!(1000), json!(2000), 0);
        assert!(file_matches_predicate(
            Some(&file),
            &["c".to_string()],
            &fixed(0)
        ));
    }

    #[test]
    fn string_bounds_prune() {
        let file = FileStatistics {
            record_count: Some(10),
            min_values: HashMap::from([("c".to_string(), json!("apple"))]),
            max_values: HashMap::from([("c".to_string(), json!("mango"))]),
            null_counts: Some(HashMap::from([("c".to_string(), 0)])),
        };
        let banana = EffectivePredicate::all()
            .with_domain("c", Domain::single_value(Datum::String("banana".into())));
        let zucchini = EffectivePredicate::all()
            .with_domain("c", Domain::single_value(Datum::String("zucchini".into())));
        assert!(matches_stats(&file, &banana));
        assert!(!matches_stats(&file, &zucchini));
    }

    #[test]
    fn date_partition_values_parse_and_prune() {
        let columns = vec!["day".to_string()];
        let values = HashMap::from([("day".to_string(), Some("2021-01-01".to_string()))]);
        // 2021-01-01 is day 18628
        let jan = EffectivePredicate::all()
            .with_domain("day", Domain::single_value(Datum::Date(18628)));
        let feb = EffectivePredicate::all()
            .with_domain("day", Domain::single_value(Datum::Date(18659)));
        assert!(partition_matches_predicate(&columns, &values, &jan));
        assert!(!partition_matches_predicate(&columns, &values, &feb));
    }
}
