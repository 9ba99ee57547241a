#![doc(issue_tracker_base_url = "https://github.com/chainbound/flowkit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Packets and the ports elements exchange them through.
//!
//! A [`Packet`] is a reference-counted byte buffer plus [`Annotations`]. Elements receive packets
//! through [`Push`] ports, hand them on through [`Outputs`], and fetch them from upstream through
//! [`Pull`] ports.

pub mod ether;
pub mod ip;
pub mod nd;

mod packet;
pub use packet::{Annotations, Packet};

mod port;
pub use port::{BoxPush, Discard, Outputs, Pull, PullFn, Push, PushFn};

pub use pnet::util::MacAddr;
