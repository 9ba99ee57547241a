//! Aggregate (flow) assignment and aggregate-based classification.

use flowkit_packet::Packet;
use tokio::sync::mpsc;

mod filter;
pub use filter::{AggregateFilter, AggregateFilterOptions};

mod ipaddrpair;
pub use ipaddrpair::{AggregateIPAddrPair, AggregateIPAddrPairOptions, FlowInfo, HostPair};

mod pattern;
pub use pattern::{AggregateRange, FilterAction, FilterRule, PatternError};

/// Observer of aggregate creation and deletion.
pub trait AggregateListener: Send {
    /// Called when `aggregate` is assigned to a new flow, with the packet that started it.
    fn on_new_aggregate(&mut self, aggregate: u32, packet: &Packet);

    /// Called when `aggregate` expires or is reaped.
    fn on_delete_aggregate(&mut self, aggregate: u32);
}

/// An aggregate lifecycle event, as sent to channel listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateEvent {
    /// A flow was assigned this aggregate.
    New(u32),
    /// This aggregate's flow expired.
    Delete(u32),
}

impl AggregateListener for mpsc::UnboundedSender<AggregateEvent> {
    fn on_new_aggregate(&mut self, aggregate: u32, _packet: &Packet) {
        let _ = self.send(AggregateEvent::New(aggregate));
    }

    fn on_delete_aggregate(&mut self, aggregate: u32) {
        let _ = self.send(AggregateEvent::Delete(aggregate));
    }
}
