//! IPv6 neighbour discovery: resolving next hops to Ethernet addresses.

mod driver;
pub use driver::{Ip6NdSolicitorDriver, Ip6NdSolicitorHandle};

mod solicitor;
pub use solicitor::{
    Ip6NdSolicitor, Ip6NdSolicitorOptions, NdStats, NdTableEntry, EXPIRE_INTERVAL, FORGET_AFTER,
    POLL_AFTER,
};
