//! # Temporal Types — UTC Ranges
//!
//! Defines `UtcRange`, the interval primitive every analysis phase and
//! every reason assignment is expressed in.
//!
//! ## Invariants
//!
//! - Both bounds are UTC instants; an absent bound means `-oo` / `+oo`.
//! - `lower <= upper` whenever both bounds are set. Violations are rejected
//!   at construction, including on deserialization.
//! - An infinite bound is never inclusive, so two ranges covering the same
//!   instants compare equal.
//! - Ranges are half-open `[lower, upper)` unless built otherwise.
//!
//! ## Rendering
//!
//! `Display` prints `[2024-01-01T00:00:00Z,+oo)`. Sub-second components are
//! kept only when present.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Render an instant as RFC 3339 with a `Z` suffix.
pub fn format_instant(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// An immutable UTC interval with optional open bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr")]
pub struct UtcRange {
    lower: Option<DateTime<Utc>>,
    upper: Option<DateTime<Utc>>,
    lower_inclusive: bool,
    upper_inclusive: bool,
}

impl UtcRange {
    /// Half-open range `[lower, upper)`.
    pub fn new(
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    ) -> Result<Self, CoreError> {
        Self::with_inclusivity(lower, upper, true, false)
    }

    /// Range with explicit bound inclusivity. Inclusivity of an absent bound
    /// is ignored.
    pub fn with_inclusivity(
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
        lower_inclusive: bool,
        upper_inclusive: bool,
    ) -> Result<Self, CoreError> {
        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return Err(CoreError::InvalidRange {
                    lower: format_instant(&l),
                    upper: format_instant(&u),
                });
            }
        }
        Ok(Self {
            lower,
            upper,
            lower_inclusive: lower.is_some() && lower_inclusive,
            upper_inclusive: upper.is_some() && upper_inclusive,
        })
    }

    /// Bounded half-open range `[lower, upper)`.
    pub fn between(lower: DateTime<Utc>, upper: DateTime<Utc>) -> Result<Self, CoreError> {
        Self::new(Some(lower), Some(upper))
    }

    /// `[lower, +oo)`.
    pub fn since(lower: DateTime<Utc>) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
            lower_inclusive: true,
            upper_inclusive: false,
        }
    }

    /// `(-oo, upper)`.
    pub fn until(upper: DateTime<Utc>) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
            lower_inclusive: false,
            upper_inclusive: false,
        }
    }

    /// `(-oo, +oo)`.
    pub fn full() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_inclusive: false,
            upper_inclusive: false,
        }
    }

    pub fn lower(&self) -> Option<DateTime<Utc>> {
        self.lower
    }

    pub fn upper(&self) -> Option<DateTime<Utc>> {
        self.upper
    }

    pub fn lower_inclusive(&self) -> bool {
        self.lower_inclusive
    }

    pub fn upper_inclusive(&self) -> bool {
        self.upper_inclusive
    }

    /// Whether the range contains no instant at all.
    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => l == u && !(self.lower_inclusive && self.upper_inclusive),
            _ => false,
        }
    }

    /// Length of the range, `None` when a bound is infinite.
    pub fn duration(&self) -> Option<Duration> {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => Some(u - l),
            _ => None,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let after_lower = match self.lower {
            None => true,
            Some(l) if self.lower_inclusive => l <= t,
            Some(l) => l < t,
        };
        let before_upper = match self.upper {
            None => true,
            Some(u) if self.upper_inclusive => t <= u,
            Some(u) => t < u,
        };
        after_lower && before_upper
    }

    /// Whether the two ranges share at least one instant.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.intersection(other).is_some()
    }

    /// The instants common to both ranges, `None` when disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let low = if cmp_lower(self, other) == Ordering::Less { other } else { self };
        let high = if cmp_upper(self, other) == Ordering::Greater { other } else { self };
        let candidate = Self {
            lower: low.lower,
            upper: high.upper,
            lower_inclusive: low.lower_inclusive,
            upper_inclusive: high.upper_inclusive,
        };
        if let (Some(l), Some(u)) = (candidate.lower, candidate.upper) {
            if l > u {
                return None;
            }
        }
        if candidate.is_empty() {
            None
        } else {
            Some(candidate)
        }
    }

    /// The smallest range covering both, only when they overlap or touch.
    pub fn union(&self, other: &Self) -> Option<Self> {
        if self.is_empty() {
            return Some(*other);
        }
        if other.is_empty() {
            return Some(*self);
        }
        if !self.overlaps(other) && !self.touches(other) {
            return None;
        }
        let low = if cmp_lower(self, other) == Ordering::Greater { other } else { self };
        let high = if cmp_upper(self, other) == Ordering::Less { other } else { self };
        Some(Self {
            lower: low.lower,
            upper: high.upper,
            lower_inclusive: low.lower_inclusive,
            upper_inclusive: high.upper_inclusive,
        })
    }

    /// Same lower bound, new upper bound.
    pub fn with_upper(&self, upper: Option<DateTime<Utc>>) -> Result<Self, CoreError> {
        Self::with_inclusivity(self.lower, upper, self.lower_inclusive, self.upper_inclusive)
    }

    /// Same upper bound, new lower bound.
    pub fn with_lower(&self, lower: Option<DateTime<Utc>>) -> Result<Self, CoreError> {
        Self::with_inclusivity(lower, self.upper, true, self.upper_inclusive)
    }

    fn touches(&self, other: &Self) -> bool {
        let meets = |a: &Self, b: &Self| match (a.upper, b.lower) {
            (Some(u), Some(l)) => u == l && (a.upper_inclusive || b.lower_inclusive),
            _ => false,
        };
        meets(self, other) || meets(other, self)
    }
}

impl std::fmt::Display for UtcRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = if self.lower_inclusive { '[' } else { '(' };
        let close = if self.upper_inclusive { ']' } else { ')' };
        let lower = self.lower.map(|l| format_instant(&l)).unwrap_or_else(|| "-oo".into());
        let upper = self.upper.map(|u| format_instant(&u)).unwrap_or_else(|| "+oo".into());
        write!(f, "{open}{lower},{upper}{close}")
    }
}

/// Lower bounds: `-oo` first, then by instant, inclusive before exclusive.
fn cmp_lower(a: &UtcRange, b: &UtcRange) -> Ordering {
    match (a.lower, b.lower) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| b.lower_inclusive.cmp(&a.lower_inclusive)),
    }
}

/// Upper bounds: `+oo` last, then by instant, exclusive before inclusive.
fn cmp_upper(a: &UtcRange, b: &UtcRange) -> Ordering {
    match (a.upper, b.upper) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| a.upper_inclusive.cmp(&b.upper_inclusive)),
    }
}

#[derive(Deserialize)]
struct RangeRepr {
    #[serde(default)]
    lower: Option<DateTime<Utc>>,
    #[serde(default)]
    upper: Option<DateTime<Utc>>,
    #[serde(default = "default_lower_inclusive")]
    lower_inclusive: bool,
    #[serde(default)]
    upper_inclusive: bool,
}

fn default_lower_inclusive() -> bool {
    true
}

impl TryFrom<RangeRepr> for UtcRange {
    type Error = CoreError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        Self::with_inclusivity(repr.lower, repr.upper, repr.lower_inclusive, repr.upper_inclusive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    // ── construction ─────────────────────────────────────────────────

    #[test]
    fn test_new_is_half_open() {
        let r = UtcRange::between(t(0), t(10)).unwrap();
        assert!(r.lower_inclusive());
        assert!(!r.upper_inclusive());
        assert!(r.contains(t(0)));
        assert!(!r.contains(t(10)));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = UtcRange::between(t(10), t(0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { .. }));
    }

    #[test]
    fn test_infinite_bound_never_inclusive() {
        let a = UtcRange::with_inclusivity(Some(t(0)), None, true, true).unwrap();
        assert_eq!(a, UtcRange::since(t(0)));
    }

    #[test]
    fn test_point_range_empty_unless_closed() {
        assert!(UtcRange::between(t(5), t(5)).unwrap().is_empty());
        let closed = UtcRange::with_inclusivity(Some(t(5)), Some(t(5)), true, true).unwrap();
        assert!(!closed.is_empty());
        assert!(closed.contains(t(5)));
    }

    // ── algebra ──────────────────────────────────────────────────────

    #[test]
    fn test_intersection_of_overlapping() {
        let a = UtcRange::between(t(0), t(10)).unwrap();
        let b = UtcRange::since(t(5));
        assert_eq!(a.intersection(&b), Some(UtcRange::between(t(5), t(10)).unwrap()));
    }

    #[test]
    fn test_adjacent_half_open_do_not_overlap() {
        let a = UtcRange::between(t(0), t(10)).unwrap();
        let b = UtcRange::between(t(10), t(20)).unwrap();
        assert!(!a.overlaps(&b));
        assert_eq!(a.union(&b), Some(UtcRange::between(t(0), t(20)).unwrap()));
    }

    #[test]
    fn test_union_of_disjoint_is_none() {
        let a = UtcRange::between(t(0), t(10)).unwrap();
        let b = UtcRange::between(t(11), t(20)).unwrap();
        assert!(a.union(&b).is_none());
    }

    #[test]
    fn test_union_with_unbounded() {
        let a = UtcRange::until(t(10));
        let b = UtcRange::since(t(5));
        assert_eq!(a.union(&b), Some(UtcRange::full()));
    }

    #[test]
    fn test_duration() {
        assert_eq!(
            UtcRange::between(t(0), t(10)).unwrap().duration(),
            Some(Duration::minutes(10))
        );
        assert_eq!(UtcRange::since(t(0)).duration(), None);
    }

    #[test]
    fn test_with_upper_derives_new_range() {
        let open = UtcRange::since(t(10));
        let closed = open.with_upper(Some(t(20))).unwrap();
        assert_eq!(closed, UtcRange::between(t(10), t(20)).unwrap());
        assert_eq!(open.upper(), None);
        assert!(open.with_upper(Some(t(5))).is_err());
    }

    // ── rendering & serde ────────────────────────────────────────────

    #[test]
    fn test_display() {
        assert_eq!(UtcRange::since(t(0)).to_string(), "[2024-01-01T00:00:00Z,+oo)");
        assert_eq!(UtcRange::full().to_string(), "(-oo,+oo)");
    }

    #[test]
    fn test_deserialize_defaults_to_half_open() {
        let r: UtcRange =
            serde_json::from_str(r#"{"lower":"2024-01-01T00:00:00Z","upper":"2024-01-01T00:10:00Z"}"#)
                .unwrap();
        assert_eq!(r, UtcRange::between(t(0), t(10)).unwrap());
    }

    #[test]
    fn test_deserialize_rejects_inverted() {
        let r: Result<UtcRange, _> =
            serde_json::from_str(r#"{"lower":"2024-01-01T00:10:00Z","upper":"2024-01-01T00:00:00Z"}"#);
        assert!(r.is_err());
    }
}
