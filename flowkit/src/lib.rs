#![doc(issue_tracker_base_url = "https://github.com/chainbound/flowkit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Flow tracking and token-bucket rate control for packet-processing graphs.

pub use flowkit_common::*;
pub use flowkit_elements::*;

pub use flowkit_packet as packet;
pub use flowkit_packet::{Discard, MacAddr, Packet, Pull, PullFn, Push, PushFn};
