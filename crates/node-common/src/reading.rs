//! Sensor readings with freshness.

/// Outcome of a cached sensor read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<T> {
    /// Measured (or reused) within its freshness window.
    Fresh(T),
    /// Last good value; the most recent attempt failed.
    Stale(T),
    /// No usable value.
    Unknown,
}

impl<T> Reading<T> {
    /// The carried value, fresh or stale.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Fresh(v) | Self::Stale(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Borrow the carried value.
    pub fn as_ref(&self) -> Reading<&T> {
        match self {
            Self::Fresh(v) => Reading::Fresh(v),
            Self::Stale(v) => Reading::Stale(v),
            Self::Unknown => Reading::Unknown,
        }
    }

    /// Transform the carried value, keeping freshness.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reading<U> {
        match self {
            Self::Fresh(v) => Reading::Fresh(f(v)),
            Self::Stale(v) => Reading::Stale(f(v)),
            Self::Unknown => Reading::Unknown,
        }
    }

    /// True for [`Reading::Fresh`].
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// True for [`Reading::Unknown`].
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Last successful value and when it was taken.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedCache<T> {
    entry: Option<(T, u64)>,
}

impl<T> Default for TimedCache<T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<T: Clone> TimedCache<T> {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value taken at `now_ms`.
    pub fn store(&mut self, value: T, now_ms: u64) {
        self.entry = Some((value, now_ms));
    }

    /// Forget the cached value.
    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// Cached value regardless of age.
    pub fn peek(&self) -> Option<&T> {
        self.entry.as_ref().map(|(v, _)| v)
    }

    /// Age of the cached value, if any.
    pub fn age(&self, now_ms: u64) -> Option<u64> {
        self.entry
            .as_ref()
            .map(|(_, stamp)| now_ms.saturating_sub(*stamp))
    }

    /// Cached value if younger than `ttl_ms`.
    pub fn fresh(&self, now_ms: u64, ttl_ms: u64) -> Option<T> {
        match &self.entry {
            Some((v, stamp)) if now_ms.saturating_sub(*stamp) < ttl_ms => Some(v.clone()),
            _ => None,
        }
    }

    /// Cached value served as stale, or unknown when there is none.
    pub fn stale(&self) -> Reading<T> {
        match &self.entry {
            Some((v, _)) => Reading::Stale(v.clone()),
            None => Reading::Unknown,
        }
    }
}
