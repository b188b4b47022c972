use std::{

    net::{IpAddr},
    time::{Duration},
};

use serde::{Serialize};

use super::error::{

    ProbeError,
    ErrorKind,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    TimeExceeded,
    Error,
    Other,
}

/// Everything learned from a single probe. Built once, never changed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProbeResult {
    pub target: String,

    /// Hop limit the reply itself arrived with, when the read exposes it.
    #[serde(rename = "ttl", skip_serializing_if = "Option::is_none")]
    pub observed_hop_limit: Option<u8>,

    #[serde(rename = "lasthop", skip_serializing_if = "Option::is_none")]
    pub last_hop: Option<IpAddr>,

    /// Milliseconds with three fractional digits, e.g. `"0.042"`.
    #[serde(rename = "rtt", skip_serializing_if = "Option::is_none")]
    pub round_trip_millis: Option<String>,

    pub outcome: Outcome,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl ProbeResult {
    pub(crate) fn failed(target: &str, reply: Option<&Reply>, error: ProbeError) -> ProbeResult {
        let reply = reply.cloned().unwrap_or_default();

        ProbeResult {

            target: target.to_string(),
            observed_hop_limit: reply.hop_limit,
            last_hop: reply.address,
            round_trip_millis: reply.elapsed
                .map(format_millis),

            outcome: Outcome::Error,
            message: error.to_string(),
            error: Some(error.kind()),
        }
    }

    pub(crate) fn replied(target: &str, reply: &Reply, outcome: Outcome, message: String) -> ProbeResult {
        ProbeResult {

            target: target.to_string(),
            observed_hop_limit: reply.hop_limit,
            last_hop: reply.address,
            round_trip_millis: reply.elapsed
                .map(format_millis),

            outcome: outcome,
            message: message,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Round trip time as a duration, parsed back from its rendered form.
    pub fn rtt(&self) -> Option<Duration> {
        self.round_trip_millis.as_ref()
            .and_then(|millis| millis.parse::<f64>().ok())
            .map(|millis| Duration::from_micros((millis * 1000.0).round() as u64))
    }
}

/// What the socket read told us before the body was looked at.
#[derive(Clone, Debug, Default)]
pub(crate) struct Reply {
    pub address: Option<IpAddr>,
    pub hop_limit: Option<u8>,
    pub elapsed: Option<Duration>,
}

/// Whole microseconds rendered as milliseconds.
pub(crate) fn format_millis(elapsed: Duration) -> String {
    let micros = elapsed.as_micros();
    format!("{}.{:03}", micros / 1000, micros % 1000)
}
