//! Latest-seen timestamp per emitter.

use chrono::{DateTime, Utc};

/// Rejects objects created at or before the newest one already sent.
#[derive(Debug, Clone, Default)]
pub struct TimeFilter {
    latest: Option<DateTime<Utc>>,
}

impl TimeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `time` is after everything cached so far.
    pub fn newer(&self, time: DateTime<Utc>) -> bool {
        match self.latest {
            Some(latest) => time > latest,
            None => true,
        }
    }

    /// Keeps the maximum of the cached time and `time`.
    pub fn cache_time(&mut self, time: DateTime<Utc>) {
        if self.newer(time) {
            self.latest = Some(time);
        }
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_filter_accepts_everything() {
        let filter = TimeFilter::new();
        assert!(filter.newer(Utc::now()));
        assert!(filter.latest().is_none());
    }

    #[test]
    fn test_cache_keeps_max() {
        let now = Utc::now();
        let mut filter = TimeFilter::new();

        filter.cache_time(now);
        filter.cache_time(now - Duration::seconds(10));
        assert_eq!(filter.latest(), Some(now));

        assert!(!filter.newer(now));
        assert!(!filter.newer(now - Duration::seconds(1)));
        assert!(filter.newer(now + Duration::seconds(1)));
    }
}
