//! Virtual time and duration used throughout the kernel.
//!
//! Time is a totally ordered scalar with two sentinels, `-inf` and `+inf`,
//! in addition to the usual finite reals. A [`Duration`] is the
//! non-negative result of a dynamic's time-advance function; it saturates
//! to [`Time::INFINITY`] on addition so a model that never fires again can
//! be represented without a special case at every call site.

use std::fmt;

/// A point in virtual time.
///
/// `Time` wraps an `f64` rather than introducing a dedicated enum: `-inf`
/// and `+inf` map onto `f64::NEG_INFINITY`/`f64::INFINITY`, which already
/// compare and add the way the DEVS semantics require. `NaN` is never a
/// valid `Time` and every public constructor guards against it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Time(f64);

impl Time {
    pub const NEG_INFINITY: Time = Time(f64::NEG_INFINITY);
    pub const ZERO: Time = Time(0.0);
    pub const INFINITY: Time = Time(f64::INFINITY);

    /// Builds a finite or infinite time value. Panics if `t` is `NaN`.
    pub fn new(t: f64) -> Self {
        assert!(!t.is_nan(), "Time must not be NaN");
        Time(t)
    }

    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    pub fn is_positive_infinity(&self) -> bool {
        self.0 == f64::INFINITY
    }

    pub fn is_negative_infinity(&self) -> bool {
        self.0 == f64::NEG_INFINITY
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }

    /// Adds a duration, saturating at `+inf`.
    pub fn add(self, d: Duration) -> Time {
        if self.is_positive_infinity() || d.is_infinite() {
            return Time::INFINITY;
        }
        Time(self.0 + d.as_f64())
    }
}

impl Eq for Time {}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).expect("Time is never NaN")
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_positive_infinity() {
            write!(f, "+inf")
        } else if self.is_negative_infinity() {
            write!(f, "-inf")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<f64> for Time {
    fn from(t: f64) -> Self {
        Time::new(t)
    }
}

/// A non-negative span of virtual time, returned by a dynamic's
/// time-advance function.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Duration(f64);

impl Duration {
    pub const ZERO: Duration = Duration(0.0);
    pub const INFINITY: Duration = Duration(f64::INFINITY);

    /// Builds a duration. Panics if `d` is negative or `NaN`; callers that
    /// need to surface a negative time-advance as a recoverable
    /// [`crate::error::EngineError`] should check the sign themselves
    /// before constructing one.
    pub fn new(d: f64) -> Self {
        assert!(!d.is_nan(), "Duration must not be NaN");
        assert!(d >= 0.0, "Duration must not be negative");
        Duration(d)
    }

    /// Builds a duration without panicking on a negative value, for the
    /// one call site (the simulator's transition epilogue) that must turn
    /// a modelling contract violation into an `EngineError` instead of an
    /// unwind.
    pub fn try_new(d: f64) -> Option<Self> {
        if d.is_nan() || d < 0.0 {
            None
        } else {
            Some(Duration(d))
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == f64::INFINITY
    }

    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

impl From<f64> for Duration {
    fn from(d: f64) -> Self {
        Duration::new(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_respects_infinities() {
        assert!(Time::NEG_INFINITY < Time::ZERO);
        assert!(Time::ZERO < Time::INFINITY);
        assert!(Time::new(1.0) < Time::new(2.0));
    }

    #[test]
    fn add_saturates_at_infinity() {
        assert_eq!(Time::new(5.0).add(Duration::INFINITY), Time::INFINITY);
        assert_eq!(Time::INFINITY.add(Duration::ZERO), Time::INFINITY);
        assert_eq!(Time::new(5.0).add(Duration::new(2.5)), Time::new(7.5));
    }

    #[test]
    #[should_panic(expected = "must not be negative")]
    fn duration_rejects_negative() {
        Duration::new(-1.0);
    }

    #[test]
    fn duration_try_new_rejects_without_panic() {
        assert!(Duration::try_new(-1.0).is_none());
        assert_eq!(Duration::try_new(3.0), Some(Duration::new(3.0)));
    }
}
