//! Metric descriptions for leader election.
//!
//! The election state machine emits these through the `metrics` facade. This
//! module only registers their descriptions with whatever recorder is installed.

use metrics::{describe_counter, describe_gauge};

/// Acquisition attempts, labelled `status` = `success` | `failure`.
pub const ACQUIRE_ATTEMPTS_TOTAL: &str = "kvd_acquire_attempts_total";
/// Renewal attempts, labelled `status` = `success` | `failure`.
pub const RENEWALS_TOTAL: &str = "kvd_renewals_total";
/// Standby -> Leader transitions.
pub const ELECTIONS_WON_TOTAL: &str = "kvd_elections_won_total";
/// Leader -> Standby transitions caused by a failed renewal.
pub const ELECTIONS_LOST_TOTAL: &str = "kvd_elections_lost_total";
/// 1 while this instance is leader, 0 otherwise.
pub const IS_LEADER: &str = "kvd_is_leader";

/// Every metric the election state machine emits.
pub const LEADERSHIP_METRICS: [&str; 5] = [
    ACQUIRE_ATTEMPTS_TOTAL,
    RENEWALS_TOTAL,
    ELECTIONS_WON_TOTAL,
    ELECTIONS_LOST_TOTAL,
    IS_LEADER,
];

/// Registers descriptions for every leadership metric.
pub fn describe_leadership_metrics() {
    describe_counter!(
        ACQUIRE_ATTEMPTS_TOTAL,
        "Total number of lease acquisition attempts"
    );
    describe_counter!(RENEWALS_TOTAL, "Total number of lease renewal attempts");
    describe_counter!(
        ELECTIONS_WON_TOTAL,
        "Total number of times this instance became leader"
    );
    describe_counter!(
        ELECTIONS_LOST_TOTAL,
        "Total number of times this instance lost leadership"
    );
    describe_gauge!(IS_LEADER, "Whether this instance currently holds the lease");
}
