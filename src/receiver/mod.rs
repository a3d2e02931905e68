//! Receiver-side media transport
//!
//! Everything between the UDP sockets and the decode pipeline: packet
//! pooling, reordering, retransmission scheduling and the per-connection
//! session that composes them.

pub mod control;
pub mod packet_pool;
pub mod pipeline;
pub mod reorder;
pub mod retransmit;
pub mod rtp_receiver;
pub mod session;
pub mod session_manager;

#[cfg(test)]
mod control_tests;
#[cfg(test)]
mod packet_pool_tests;
#[cfg(test)]
mod reorder_tests;
