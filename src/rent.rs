use serde::Serialize;

use crate::model::Ms;

pub const DEFAULT_HOURLY_RATE: u64 = 50;

const HOUR_MS: u64 = 3_600_000;

/// Billed hours and the amount owed for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub billed_hours: u64,
    pub amount: u64,
}

/// Flat hourly pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tariff {
    hourly_rate: u64,
}

impl Default for Tariff {
    fn default() -> Self {
        Self::new(DEFAULT_HOURLY_RATE)
    }
}

impl Tariff {
    pub const fn new(hourly_rate: u64) -> Self {
        Self { hourly_rate }
    }

    pub fn hourly_rate(&self) -> u64 {
        self.hourly_rate
    }

    /// Total over all inputs: a checkout before check-in bills nothing.
    pub fn bill(&self, check_in: Ms, check_out: Ms) -> Bill {
        let billed_hours = billed_hours(check_in, check_out);
        Bill {
            billed_hours,
            amount: billed_hours.saturating_mul(self.hourly_rate),
        }
    }
}

/// Elapsed time rounded up to the next whole hour. Zero or negative elapsed
/// time is zero hours.
pub fn billed_hours(check_in: Ms, check_out: Ms) -> u64 {
    let elapsed = check_out.saturating_sub(check_in);
    if elapsed <= 0 {
        return 0;
    }
    (elapsed as u64).div_ceil(HOUR_MS)
}
