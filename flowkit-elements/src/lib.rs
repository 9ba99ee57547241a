#![doc(issue_tracker_base_url = "https://github.com/chainbound/flowkit/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Packet-processing elements.
//!
//! Push elements ([`AggregateIPAddrPair`], [`AggregateFilter`]) are plain values that implement
//! [`Push`](flowkit_packet::Push) and can be chained directly. Elements that keep their own
//! schedule ([`RatedUnqueue`], [`LinkUnqueue`], [`Ip6NdSolicitor`], [`AckRetrySender`]) are bound
//! to their ports with `into_driver`, which returns a driver future to run on tokio and a handle
//! for statistics and control. `spawn` does both.

mod config;
pub use config::{ConfigError, ConfigErrors, HandleError};

pub mod aggregate;
pub use aggregate::{
    AggregateEvent, AggregateFilter, AggregateFilterOptions, AggregateIPAddrPair,
    AggregateIPAddrPairOptions, AggregateListener, FilterAction, FilterRule,
};

pub mod nd;
pub use nd::{Ip6NdSolicitor, Ip6NdSolicitorHandle, Ip6NdSolicitorOptions};

pub mod retry;
pub use retry::{AckRetrySender, AckRetrySenderHandle, AckRetrySenderOptions};

mod timer;

pub mod unqueue;
pub use unqueue::{
    LinkUnqueue, LinkUnqueueHandle, LinkUnqueueOptions, RateUnit, RatedUnqueue,
    RatedUnqueueHandle, RatedUnqueueOptions,
};
