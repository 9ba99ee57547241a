//! Stop-and-wait retransmission with link-level acknowledgements.

mod driver;
pub use driver::{AckRetrySenderDriver, AckRetrySenderHandle};

mod sender;
pub use sender::{
    AckRetrySender, AckRetrySenderOptions, TxHistory, TxResult, TxSummary, ETHERTYPE_ACK,
};
