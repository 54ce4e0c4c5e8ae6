// MIT License - Copyright (c) 2026 Peter Wright
// Outbound transport seam

use std::future::Future;

use crate::error::Result;
use crate::protocol::OutboundCommand;

/// Something that can deliver commands to the panel.
///
/// Implemented by the connection manager; the heartbeat loop only depends on
/// this trait, so it can be driven by a scripted transport in tests.
pub trait Transport: Send + Sync {
    /// Encode and write one command. Fails with `NotConnected` when there is
    /// no live socket.
    fn send(&self, command: &OutboundCommand) -> impl Future<Output = Result<()>> + Send;

    /// Whether the link is currently up.
    fn is_connected(&self) -> bool;
}
