//! # Connection Supervisor
//!
//! Lazy-reconnect wrapper around exactly one external resource. Liveness is
//! never polled: a link is assumed alive until an operation on it fails, and
//! a dead link gets one connect attempt per call to
//! [`Supervisor::ensure_connected`], which the sample loop makes at most once
//! per tick. The tick period is therefore the reconnect rate limit.
//!
//! Every connect and operation is bounded by the supervisor's I/O timeout so a
//! hung peripheral cannot stall sampling of the others.

use crate::sensors::ReadError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("read failure: {0}")]
    ReadFailure(#[from] ReadError),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("publish failure: {0}")]
    PublishFailure(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },
    #[error("link is not connected")]
    NotConnected,
}

/// Resource-specific capabilities a [`Supervisor`] is parameterized by.
///
/// `connect` must either leave the link usable or fail; `call` performs the
/// one operation the resource exists for (a register read, a publish).
#[allow(async_fn_in_trait)]
pub trait Link {
    type Request;
    type Response;

    /// Human-readable resource name for log lines
    fn name(&self) -> &str;

    async fn connect(&mut self) -> Result<(), LinkError>;

    async fn call(&mut self, request: Self::Request) -> Result<Self::Response, LinkError>;

    /// Release whatever the last successful `connect` acquired.
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStats {
    pub connect_attempts: u32,
    pub consecutive_failures: u32,
    pub successful_calls: u32,
    pub failed_calls: u32,
    pub disconnects: u32,
}

pub struct Supervisor<L: Link> {
    link: L,
    state: ConnectionState,
    io_timeout: Duration,
    stats: SupervisorStats,
}

impl<L: Link> Supervisor<L> {
    pub fn new(link: L, io_timeout: Duration) -> Self {
        Self {
            link,
            state: ConnectionState::Disconnected,
            io_timeout,
            stats: SupervisorStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn name(&self) -> &str {
        self.link.name()
    }

    /// Returns current liveness, making one connect attempt if disconnected.
    pub async fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        self.stats.connect_attempts = self.stats.connect_attempts.saturating_add(1);

        let result = match timeout(self.io_timeout, self.link.connect()).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout {
                operation: "connect",
                after: self.io_timeout,
            }),
        };

        match result {
            Ok(()) => {
                info!(
                    resource = %self.link.name(),
                    after_failures = self.stats.consecutive_failures,
                    "🔗 Connected"
                );
                self.state = ConnectionState::Connected;
                self.stats.consecutive_failures = 0;
                true
            }
            Err(e) => {
                self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
                warn!(
                    resource = %self.link.name(),
                    attempt = self.stats.consecutive_failures,
                    "Connect failed: {}", e
                );
                // A half-open handle from a timed-out connect must not linger
                self.link.close().await;
                false
            }
        }
    }

    /// Runs the link's operation on a live connection.
    ///
    /// A failure marks the link disconnected and yields `None`; it is not
    /// retried here. The caller must have seen `ensure_connected` succeed,
    /// otherwise this returns `None` without touching the resource.
    pub async fn call(&mut self, request: L::Request) -> Option<L::Response> {
        if !self.is_connected() {
            return None;
        }

        let result = match timeout(self.io_timeout, self.link.call(request)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout {
                operation: "call",
                after: self.io_timeout,
            }),
        };

        match result {
            Ok(response) => {
                self.stats.successful_calls = self.stats.successful_calls.saturating_add(1);
                Some(response)
            }
            Err(e) => {
                self.stats.failed_calls = self.stats.failed_calls.saturating_add(1);
                self.mark_disconnected(&e).await;
                None
            }
        }
    }

    /// One tick's worth of work: operate if connected, otherwise spend the
    /// tick on a single connect attempt and report no result.
    pub async fn service(&mut self, request: L::Request) -> Option<L::Response> {
        if self.is_connected() {
            self.call(request).await
        } else {
            self.ensure_connected().await;
            None
        }
    }

    pub async fn mark_disconnected(&mut self, reason: &LinkError) {
        warn!(resource = %self.link.name(), "⚠️  Connection lost: {}", reason);
        self.link.close().await;
        self.state = ConnectionState::Disconnected;
        self.stats.disconnects = self.stats.disconnects.saturating_add(1);
        debug!(resource = %self.link.name(), stats = ?self.stats, "supervisor stats");
    }

    /// Explicit release at process shutdown.
    pub async fn shutdown(&mut self) {
        if self.is_connected() {
            self.link.close().await;
            self.state = ConnectionState::Disconnected;
            info!(resource = %self.link.name(), "🛑 Closed");
        }
    }
}
