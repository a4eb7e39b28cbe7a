//! Effective predicates: per column constraints used for pruning.
//!
//! A predicate maps lower cased column names to [`Domain`]s. A column absent
//! from the map is unconstrained. The whole predicate can also be `none`,
//! meaning the constraints are contradictory and no row anywhere can match.
//!
//! The log carries no schema for statistics, so domains are self describing:
//! the [`Datum`]s inside a domain fix the type that partition values and
//! statistics bounds for that column are interpreted as.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Primitive column types that pruning can reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Long,
    Double,
    Date,
    Timestamp,
    String,
    Binary,
}

/// A single typed value.
///
/// Ordering is only meaningful between values of the same variant; domains
/// are homogeneous so mixed comparisons never arise in practice.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Datum {
    Boolean(bool),
    /// Any integer type, widened.
    Long(i64),
    /// Any floating point type, widened.
    Double(f64),
    /// Days since the unix epoch.
    Date(i32),
    /// Microseconds since the unix epoch.
    Timestamp(i64),
    String(String),
    Binary(Vec<u8>),
}

impl Datum {
    pub fn data_type(&self) -> PrimitiveType {
        match self {
            Datum::Boolean(_) => PrimitiveType::Boolean,
            Datum::Long(_) => PrimitiveType::Long,
            Datum::Double(_) => PrimitiveType::Double,
            Datum::Date(_) => PrimitiveType::Date,
            Datum::Timestamp(_) => PrimitiveType::Timestamp,
            Datum::String(_) => PrimitiveType::String,
            Datum::Binary(_) => PrimitiveType::Binary,
        }
    }

    /// Interpret a recorded statistics bound as a value of `data_type`.
    ///
    /// Returns `None` when the recorded value cannot represent a bound of
    /// that type; the pruner treats that as an unknown bound. Non finite
    /// floats are rejected for the same reason, since comparisons against
    /// them prove nothing.
    pub(crate) fn decode_bound(value: &Value, data_type: PrimitiveType) -> Option<Datum> {
        match data_type {
            PrimitiveType::Boolean => value.as_bool().map(Datum::Boolean),
            PrimitiveType::Long => value.as_i64().map(Datum::Long),
            PrimitiveType::Double => value
                .as_f64()
                .filter(|f| f.is_finite())
                .map(Datum::Double),
            PrimitiveType::Date => match value {
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|days| i32::try_from(days).ok())
                    .map(Datum::Date),
                Value::String(s) => parse_date(s).map(Datum::Date),
                _ => None,
            },
            PrimitiveType::Timestamp => match value {
                Value::Number(n) => n.as_i64().map(Datum::Timestamp),
                Value::String(s) => parse_timestamp(s).map(Datum::Timestamp),
                _ => None,
            },
            PrimitiveType::String => value.as_str().map(|s| Datum::String(s.to_string())),
            PrimitiveType::Binary => None,
        }
    }

    /// Parse a partition value string as a value of `data_type`.
    pub(crate) fn parse_partition_value(raw: &str, data_type: PrimitiveType) -> Option<Datum> {
        match data_type {
            PrimitiveType::Boolean if raw.eq_ignore_ascii_case("true") => {
                Some(Datum::Boolean(true))
            }
            PrimitiveType::Boolean if raw.eq_ignore_ascii_case("false") => {
                Some(Datum::Boolean(false))
            }
            PrimitiveType::Boolean => None,
            PrimitiveType::Long => raw.parse().ok().map(Datum::Long),
            PrimitiveType::Double => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Datum::Double),
            PrimitiveType::Date => parse_date(raw).map(Datum::Date),
            PrimitiveType::Timestamp => parse_timestamp(raw).map(Datum::Timestamp),
            PrimitiveType::String => Some(Datum::String(raw.to_string())),
            PrimitiveType::Binary => None,
        }
    }
}

fn parse_date(raw: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    i32::try_from(date.signed_duration_since(epoch).num_days()).ok()
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_micros());
    }
    // hive style partition timestamps use a space separator and no zone
    let dt = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Some(dt.and_utc().timestamp_micros())
}

/// A closed range of values; `None` on either side means unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub low: Option<Datum>,
    pub high: Option<Datum>,
}

impl ValueRange {
    pub fn new(low: Option<Datum>, high: Option<Datum>) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, value: &Datum) -> bool {
        self.low.as_ref().map_or(true, |low| low <= value)
            && self.high.as_ref().map_or(true, |high| value <= high)
    }

    /// Whether this range can share a value with the closed interval
    /// `[min, max]`. Incomparable bounds count as overlapping, keeping the
    /// check conservative.
    pub fn overlaps_bounds(&self, min: &Datum, max: &Datum) -> bool {
        let above = self
            .low
            .as_ref()
            .is_some_and(|low| matches!(low.partial_cmp(max), Some(std::cmp::Ordering::Greater)));
        let below = self
            .high
            .as_ref()
            .is_some_and(|high| matches!(high.partial_cmp(min), Some(std::cmp::Ordering::Less)));
        !(above || below)
    }

    /// The common sub range, or `None` when the two are provably disjoint.
    pub fn intersect(&self, other: &ValueRange) -> Option<ValueRange> {
        let low = tighter_bound(self.low.as_ref(), other.low.as_ref(), true);
        let high = tighter_bound(self.high.as_ref(), other.high.as_ref(), false);
        if let (Some(low), Some(high)) = (&low, &high) {
            if matches!(low.partial_cmp(high), Some(std::cmp::Ordering::Greater)) {
                return None;
            }
        }
        Some(ValueRange { low, high })
    }
}

fn tighter_bound(a: Option<&Datum>, b: Option<&Datum>, take_max: bool) -> Option<Datum> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) => {
            let x_wins = match x.partial_cmp(y) {
                Some(std::cmp::Ordering::Greater) => take_max,
                Some(std::cmp::Ordering::Less) => !take_max,
                _ => true,
            };
            Some(if x_wins { x.clone() } else { y.clone() })
        }
    }
}

/// The non null values a column is allowed to take.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSet {
    /// Every non null value.
    All,
    /// No non null value.
    None,
    /// Exactly these values.
    Values(Vec<Datum>),
    /// Any value inside one of these ranges.
    Ranges(Vec<ValueRange>),
}

impl ValueSet {
    fn intersect(&self, other: &ValueSet) -> ValueSet {
        match (self, other) {
            (ValueSet::All, that) => that.clone(),
            (this, ValueSet::All) => this.clone(),
            (ValueSet::None, _) | (_, ValueSet::None) => ValueSet::None,
            (ValueSet::Values(xs), ValueSet::Values(ys)) => {
                collapse_values(xs.iter().filter(|x| ys.contains(x)).cloned().collect())
            }
            (ValueSet::Values(xs), ValueSet::Ranges(rs))
            | (ValueSet::Ranges(rs), ValueSet::Values(xs)) => collapse_values(
                xs.iter()
                    .filter(|x| rs.iter().any(|r| r.contains(x)))
                    .cloned()
                    .collect(),
            ),
            (ValueSet::Ranges(xs), ValueSet::Ranges(ys)) => {
                let kept: Vec<ValueRange> = xs
                    .iter()
                    .flat_map(|x| ys.iter().filter_map(|y| x.intersect(y)))
                    .collect();
                if kept.is_empty() {
                    ValueSet::None
                } else {
                    ValueSet::Ranges(kept)
                }
            }
        }
    }
}

fn collapse_values(values: Vec<Datum>) -> ValueSet {
    if values.is_empty() {
        ValueSet::None
    } else {
        ValueSet::Values(values)
    }
}

/// The constraint on one column: a set of allowed non null values plus
/// whether null itself is allowed.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    values: ValueSet,
    null_allowed: bool,
}

impl Domain {
    pub fn new(values: ValueSet, null_allowed: bool) -> Self {
        Self {
            values,
            null_allowed,
        }
    }

    /// No constraint at all.
    pub fn all() -> Self {
        Self::new(ValueSet::All, true)
    }

    /// Nothing matches, not even null.
    pub fn none() -> Self {
        Self::new(ValueSet::None, false)
    }

    /// Only null matches.
    pub fn only_null() -> Self {
        Self::new(ValueSet::None, true)
    }

    /// Exactly one non null value.
    pub fn single_value(value: Datum) -> Self {
        Self::new(ValueSet::Values(vec![value]), false)
    }

    pub fn multiple_values(values: Vec<Datum>) -> Self {
        Self::new(collapse_values(values), false)
    }

    /// A single closed range.
    pub fn range(low: Option<Datum>, high: Option<Datum>) -> Self {
        Self::new(ValueSet::Ranges(vec![ValueRange::new(low, high)]), false)
    }

    pub fn with_null_allowed(mut self, null_allowed: bool) -> Self {
        self.null_allowed = null_allowed;
        self
    }

    pub fn values(&self) -> &ValueSet {
        &self.values
    }

    pub fn null_allowed(&self) -> bool {
        self.null_allowed
    }

    pub fn is_none(&self) -> bool {
        matches!(self.values, ValueSet::None) && !self.null_allowed
    }

    pub fn is_only_null(&self) -> bool {
        matches!(self.values, ValueSet::None) && self.null_allowed
    }

    /// The type the domain's values carry, `None` for `All`/`None` sets
    /// which are type free.
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        match &self.values {
            ValueSet::All | ValueSet::None => None,
            ValueSet::Values(values) => values.first().map(Datum::data_type),
            ValueSet::Ranges(ranges) => ranges
                .iter()
                .find_map(|r| r.low.as_ref().or(r.high.as_ref()))
                .map(Datum::data_type),
        }
    }

    /// Whether a non null value lies in the allowed set.
    pub fn contains(&self, value: &Datum) -> bool {
        match &self.values {
            ValueSet::All => true,
            ValueSet::None => false,
            ValueSet::Values(values) => values.contains(value),
            ValueSet::Ranges(ranges) => ranges.iter().any(|r| r.contains(value)),
        }
    }

    /// Whether any value in `[min, max]` lies in the allowed set.
    pub fn overlaps_bounds(&self, min: &Datum, max: &Datum) -> bool {
        match &self.values {
            ValueSet::All => true,
            ValueSet::None => false,
            ValueSet::Values(values) => values.iter().any(|v| min <= v && v <= max),
            ValueSet::Ranges(ranges) => ranges.iter().any(|r| r.overlaps_bounds(min, max)),
        }
    }

    pub fn intersect(&self, other: &Domain) -> Domain {
        Domain {
            values: self.values.intersect(&other.values),
            null_allowed: self.null_allowed && other.null_allowed,
        }
    }
}

/// The combined constraint over all columns of a scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectivePredicate {
    /// `None` means the predicate is contradictory and matches nothing.
    domains: Option<HashMap<String, Domain>>,
}

impl EffectivePredicate {
    /// Matches everything.
    pub fn all() -> Self {
        Self {
            domains: Some(HashMap::new()),
        }
    }

    /// Matches nothing.
    pub fn none() -> Self {
        Self { domains: None }
    }

    /// Constrain `column` to `domain`. Column names are matched case
    /// insensitively, so the name is lower cased here. Constraining a column
    /// to an empty domain collapses the whole predicate to `none`.
    pub fn with_domain(mut self, column: impl Into<String>, domain: Domain) -> Self {
        if domain.is_none() {
            return Self::none();
        }
        if let Some(domains) = &mut self.domains {
            domains.insert(column.into().to_lowercase(), domain);
        }
        self
    }

    pub fn is_none(&self) -> bool {
        self.domains.is_none()
    }

    /// Per column domains, or `None` for a contradictory predicate.
    pub fn domains(&self) -> Option<&HashMap<String, Domain>> {
        self.domains.as_ref()
    }

    /// The columns this predicate constrains.
    pub fn columns(&self) -> HashSet<String> {
        self.domains
            .as_ref()
            .map(|domains| domains.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Conjunction of two predicates. Collapses to `none` as soon as any
    /// column's combined domain becomes empty.
    pub fn intersect(&self, other: &EffectivePredicate) -> EffectivePredicate {
        let (Some(mine), Some(theirs)) = (&self.domains, &other.domains) else {
            return EffectivePredicate::none();
        };
        let mut combined = mine.clone();
        for (column, domain) in theirs {
            let merged = match combined.get(column) {
                Some(existing) => existing.intersect(domain),
                None => domain.clone(),
            };
            if merged.is_none() {
                return EffectivePredicate::none();
            }
            combined.insert(column.clone(), merged);
        }
        EffectivePredicate {
            domains: Some(combined),
        }
    }
}
