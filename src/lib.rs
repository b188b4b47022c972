//! Echoprobe sends a single echo request and tells you who answered, and how fast.
//!
//! Each call opens its own raw socket, sends exactly one request, and waits
//! for exactly one reply or until the timeout runs out. Raw sockets usually
//! need elevated privileges, without them the probe reports an error rather
//! than failing.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::{Duration};
//!
//! use echoprobe::{
//!     ProbeRequest,
//!     IpVersion,
//!     Outcome,
//! };
//!
//! fn main() {
//!     let request = ProbeRequest::new("one.one.one.one")
//!         .with_version(IpVersion::V4)
//!         .with_hop_limit(1)
//!         .with_timeout(Duration::from_millis(500));
//!
//!     let result = echoprobe::probe(&request);
//!     match result.outcome {
//!
//!         Outcome::Success => println!("{} answered in {:?} ms", request.destination, result.round_trip_millis),
//!         Outcome::TimeExceeded => println!("first hop is {:?}", result.last_hop),
//!         Outcome::Other => println!("unexpected reply: {}", result.message),
//!         Outcome::Error => println!("probe failed: {}", result.message),
//!     }
//! }
//! ```

mod responses;
mod packets;
mod sender;

pub use sender::{

    ProbeRequest,
    IpVersion,

    probe_v4,
    probe_v6,
    probe,
};

pub mod error;

pub use responses::{

    ProbeResult,
    Outcome,
};
