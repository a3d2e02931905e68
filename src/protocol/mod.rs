//! Wire formats used by the transport core

pub mod rtp;
pub mod sdp;
