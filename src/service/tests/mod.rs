use super::test_helpers::*;
use super::*;
use crate::error::SessionError;
use crate::relay::RelayEnvelope;
use crate::types::{ConnectionState, DeliveryStatus, RelayOutcome, SessionId};
use std::time::Duration;

mod lifecycle;

/// Project directory used by [`batch`]
fn project_dir(relay: &CaptureRelay) -> std::path::PathBuf {
    relay
        .config
        .storage
        .upload_root
        .join("model")
        .join("line-3")
        .join("bridge")
}

/// Decode every message the transport captured
fn envelopes(transport: &MemoryTransport) -> Vec<RelayEnvelope> {
    transport
        .published()
        .iter()
        .map(|m| RelayEnvelope::from_bytes(&m.payload).unwrap())
        .collect()
}
