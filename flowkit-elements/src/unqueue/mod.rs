//! Pull-to-push converters: elements that pull packets from an upstream and push them
//! downstream on their own schedule.

mod link;
pub use link::{
    LinkUnqueue, LinkUnqueueDriver, LinkUnqueueHandle, LinkUnqueueOptions, LinkUnqueueStats,
    MIN_BANDWIDTH,
};

mod rated;
pub use rated::{
    RateUnit, RatedUnqueue, RatedUnqueueDriver, RatedUnqueueHandle, RatedUnqueueOptions,
    RatedUnqueueStats, BANDWIDTH_THRESHOLD,
};
