//! # Bundle Version
//!
//! A `(generation, value)` counter stamped on every bundle and emitted event.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Version Lifecycle                               │
//! │                                                                         │
//! │   0.0 ──incr()──► 0.1 ──incr()──► 0.2 ──send ok──► next() ──► 1.0       │
//! │                    │               │                          │         │
//! │                 mutation        mutation                  baseline      │
//! │                                                          (last sent)    │
//! │                                                                         │
//! │   should_send  = current.newer_than(last_sent)                          │
//! │   manager drop = incoming <= last_processed                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Monotonic bundle version.
///
/// Ordering is lexicographic on `(generation, value)`, which is exactly the
/// derived `Ord` given the field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub generation: u64,
    pub value: u64,
}

impl Version {
    /// Returns the zero version `0.0`.
    pub fn new() -> Self {
        Version::default()
    }

    /// Creates a version from its parts.
    pub fn from_parts(generation: u64, value: u64) -> Self {
        Version { generation, value }
    }

    /// Marks a mutation since the last send.
    pub fn incr(&mut self) {
        self.value += 1;
    }

    /// Starts a new generation after a successful send.
    pub fn next(&mut self) {
        self.generation += 1;
        self.value = 0;
    }

    /// True when `self` sorts strictly after `other`.
    pub fn newer_than(&self, other: &Version) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    /// True when both parts match.
    pub fn equal(&self, other: &Version) -> bool {
        self == other
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.value)
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidVersion(s.to_string());

        let (generation, value) = s.trim().split_once('.').ok_or_else(invalid)?;
        Ok(Version {
            generation: generation.parse().map_err(|_| invalid())?,
            value: value.parse().map_err(|_| invalid())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_and_next() {
        let mut v = Version::new();
        v.incr();
        v.incr();
        assert_eq!(v, Version::from_parts(0, 2));

        v.next();
        assert_eq!(v, Version::from_parts(1, 0));
    }

    #[test]
    fn test_monotonic_over_mixed_sequence() {
        // i = incr, n = next
        let ops = "iininiiinnii";
        let mut v = Version::new();
        let mut seen = vec![v];

        for op in ops.chars() {
            match op {
                'i' => v.incr(),
                _ => v.next(),
            }
            seen.push(v);
        }

        for pair in seen.windows(2) {
            assert!(pair[1].newer_than(&pair[0]), "{} !> {}", pair[1], pair[0]);
            assert!(!pair[0].newer_than(&pair[1]));
        }
    }

    #[test]
    fn test_newer_than_is_lexicographic() {
        let a = Version::from_parts(1, 9);
        let b = Version::from_parts(2, 0);

        assert!(b.newer_than(&a));
        assert!(!a.newer_than(&b));
        assert!(!a.newer_than(&a));
        assert!(a.equal(&Version::from_parts(1, 9)));
    }

    #[test]
    fn test_string_form() {
        let v = Version::from_parts(3, 14);
        assert_eq!(v.to_string(), "3.14");
        assert_eq!("3.14".parse::<Version>().unwrap(), v);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Version>().is_err());
        assert!("3".parse::<Version>().is_err());
        assert!("a.b".parse::<Version>().is_err());
        assert!("1.-2".parse::<Version>().is_err());
    }
}
