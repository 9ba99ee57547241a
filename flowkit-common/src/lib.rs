#![doc(issue_tracker_base_url = "https://github.com/chainbound/flowkit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Time and rate-control primitives shared by the flowkit crates.

pub mod clock;
pub use clock::{Jiffies, JiffyClock, HZ};

pub mod timestamp;
pub use timestamp::{Timestamp, SUBSEC_PER_SEC};

pub mod token_bucket;
pub use token_bucket::{Epoch, SplitTokenBucket, SplitTokenRate, Token};

/// Byte-size constants.
#[allow(non_upper_case_globals)]
pub mod constants {
    /// One kibibyte.
    pub const KiB: u32 = 1024;
    /// One mebibyte.
    pub const MiB: u32 = 1024 * KiB;
    /// One gibibyte.
    pub const GiB: u32 = 1024 * MiB;
}
