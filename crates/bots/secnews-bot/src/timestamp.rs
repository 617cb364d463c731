use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Whole seconds since the unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    pub fn now() -> Self {
        Self(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        )
    }

    /// Negative (pre-epoch) times clamp to [`Timestamp::ZERO`].
    pub fn from_unix_secs(secs: i64) -> Self {
        Self(u64::try_from(secs).unwrap_or(0))
    }

    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Saturating: returns 0 when `earlier` is actually later than `self`.
    pub fn secs_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_secs(self.secs_since(earlier))
    }

    pub fn to_offset_date_time(self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(i64::try_from(self.0).ok()?).ok()
    }
}

impl From<u64> for Timestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self
            .to_offset_date_time()
            .and_then(|dt| dt.format(&Rfc3339).ok())
        {
            Some(s) => f.write_str(&s),
            None => write!(f, "@{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_since_saturates_for_future_timestamps() {
        let now = Timestamp::from(1_700_000_000);
        assert_eq!(now.secs_since(Timestamp::from(1_699_999_000)), 1000);
        assert_eq!(now.secs_since(Timestamp::from(1_700_000_500)), 0);
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        assert_eq!(Timestamp::from_unix_secs(-5), Timestamp::ZERO);
        assert_eq!(Timestamp::from_unix_secs(42).as_secs(), 42);
    }

    #[test]
    fn displays_as_rfc3339() {
        assert_eq!(
            Timestamp::from(1_700_000_000).to_string(),
            "2023-11-14T22:13:20Z"
        );
    }
}
