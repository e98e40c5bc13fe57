use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Source of the current time for result timestamps and model versions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    fn now_rfc3339(&self) -> String {
        self.now()
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.now().unix_timestamp().to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}
