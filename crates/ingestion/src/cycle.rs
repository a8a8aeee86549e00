//! Forecast cycle resolution.
//!
//! Every hourly trigger initializes its own cycle at its own hour. The four
//! synoptic hours carry the extended horizon; all other hours the short one.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Synoptic initialization hours (UTC) that carry the full horizon.
pub const SYNOPTIC_HOURS: [u32; 4] = [0, 6, 12, 18];

/// Last hourly lead time shared by both horizon classes.
pub const HOURLY_LEAD_END: u32 = 36;

/// Last lead time of the full horizon.
pub const FULL_LEAD_END: u32 = 84;

/// Step of the 3-hourly tail of the full horizon.
pub const FULL_LEAD_STEP: u32 = 3;

/// Lead-time sequence class of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizonClass {
    /// 1..=36 hourly, then 39..=84 every 3 h (52 values).
    Full,
    /// 1..=36 hourly (36 values).
    Partial,
}

impl HorizonClass {
    /// Horizon class for an initialization hour.
    pub fn for_hour(hour: u32) -> Self {
        if SYNOPTIC_HOURS.contains(&hour) {
            Self::Full
        } else {
            Self::Partial
        }
    }

    /// Expected lead times in hours, ascending.
    pub fn lead_times(&self) -> Vec<u32> {
        let hourly = 1..=HOURLY_LEAD_END;
        match self {
            Self::Partial => hourly.collect(),
            Self::Full => hourly
                .chain(
                    (HOURLY_LEAD_END + FULL_LEAD_STEP..=FULL_LEAD_END)
                        .step_by(FULL_LEAD_STEP as usize),
                )
                .collect(),
        }
    }

    /// Number of lead times in the sequence.
    pub fn len(&self) -> usize {
        match self {
            Self::Full => {
                (HOURLY_LEAD_END + (FULL_LEAD_END - HOURLY_LEAD_END) / FULL_LEAD_STEP) as usize
            }
            Self::Partial => HOURLY_LEAD_END as usize,
        }
    }

    /// Position of `hour` in the sequence, or `None` when it is not part of it.
    pub fn lead_time_index(&self, hour: u32) -> Option<usize> {
        if (1..=HOURLY_LEAD_END).contains(&hour) {
            return Some((hour - 1) as usize);
        }
        match self {
            Self::Full
                if hour > HOURLY_LEAD_END
                    && hour <= FULL_LEAD_END
                    && (hour - HOURLY_LEAD_END) % FULL_LEAD_STEP == 0 =>
            {
                Some((HOURLY_LEAD_END + (hour - HOURLY_LEAD_END) / FULL_LEAD_STEP - 1) as usize)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

impl std::fmt::Display for HorizonClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One initialization of the source model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastCycle {
    /// Hour-aligned initialization time.
    pub init_time: DateTime<Utc>,
    pub horizon: HorizonClass,
}

impl ForecastCycle {
    /// Resolve the cycle initialized at the hour containing `now`.
    pub fn resolve(now: DateTime<Utc>) -> Self {
        let init_time = floor_to_hour(now);
        Self {
            init_time,
            horizon: HorizonClass::for_hour(init_time.hour()),
        }
    }

    /// Expected lead times for this cycle.
    pub fn lead_times(&self) -> Vec<u32> {
        self.horizon.lead_times()
    }

    /// Compact identifier, `YYYYMMDDHH`.
    pub fn id(&self) -> String {
        self.init_time.format("%Y%m%d%H").to_string()
    }

    /// `YYYYMMDD` of the initialization.
    pub fn date_str(&self) -> String {
        self.init_time.format("%Y%m%d").to_string()
    }

    /// Initialization hour of day.
    pub fn hour(&self) -> u32 {
        self.init_time.hour()
    }

    /// Valid time of a lead time.
    pub fn valid_time(&self, lead_hour: u32) -> DateTime<Utc> {
        self.init_time + Duration::hours(i64::from(lead_hour))
    }

    /// Source file coordinates of one lead time.
    pub fn source_file(&self, lead_hour: u32) -> SourceFileCoord {
        SourceFileCoord {
            cycle: *self,
            lead_hour,
        }
    }
}

impl std::fmt::Display for ForecastCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Resolves the cycle to ingest from the trigger time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleResolver {
    /// Hours to look back before flooring, for upstream publication latency.
    pub delay_hours: u32,
}

impl CycleResolver {
    pub fn new(delay_hours: u32) -> Self {
        Self { delay_hours }
    }

    /// Cycle to ingest for a trigger at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> ForecastCycle {
        ForecastCycle::resolve(now - Duration::hours(i64::from(self.delay_hours)))
    }
}

/// Location of one upstream source file (all variables of one lead time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFileCoord {
    pub cycle: ForecastCycle,
    pub lead_hour: u32,
}

/// NOMADS base URL for NBM products.
pub const NOMADS_BASE_URL: &str = "https://nomads.ncep.noaa.gov/pub/data/nccf/com/blend/prod";

impl SourceFileCoord {
    /// File name, e.g. `blend.t06z.core.f039.co.grib2`.
    pub fn file_name(&self) -> String {
        format!(
            "blend.t{:02}z.core.f{:03}.co.grib2",
            self.cycle.hour(),
            self.lead_hour
        )
    }

    /// Full download URL below `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/blend.{}/{:02}/core/{}",
            base_url.trim_end_matches('/'),
            self.cycle.date_str(),
            self.cycle.hour(),
            self.file_name()
        )
    }
}

fn floor_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}
