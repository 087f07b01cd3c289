//! # Prometheus Metrics
//!
//! Vote and connection counters, scraped at `GET /metrics` on the HTTP
//! port. Everything lives in a dedicated [`prometheus::Registry`] under the
//! `votifier` prefix.
//!
//! [`NodeMetrics`] doubles as the socket server's
//! [`ConnectionObserver`] so the protocol crate stays free of any metrics
//! dependency.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use votifier_protocol::socket::ConnectionObserver;
use votifier_protocol::{AcceptedVote, Transport, VoteError};

/// Handles for every metric the node exports.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Accepted votes by `protocol` (v1/v2, or unknown for test votes) and
    /// `transport` (http/socket/test).
    pub votes_accepted_total: IntCounterVec,
    /// Rejected submissions by `reason` ([`VoteError::kind`]).
    pub votes_rejected_total: IntCounterVec,
    pub socket_connections_total: IntCounter,
    pub socket_connections_active: IntGauge,
    /// Entries removed by the expiry sweep.
    pub cleanup_removed_total: IntCounter,
}

impl NodeMetrics {
    /// Create and register all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("votifier".into()), None)?;

        let votes_accepted_total = IntCounterVec::new(
            Opts::new("votes_accepted_total", "Votes accepted and dispatched"),
            &["protocol", "transport"],
        )?;
        registry.register(Box::new(votes_accepted_total.clone()))?;

        let votes_rejected_total = IntCounterVec::new(
            Opts::new("votes_rejected_total", "Vote submissions rejected"),
            &["reason"],
        )?;
        registry.register(Box::new(votes_rejected_total.clone()))?;

        let socket_connections_total = IntCounter::new(
            "socket_connections_total",
            "Connections accepted on the Votifier socket",
        )?;
        registry.register(Box::new(socket_connections_total.clone()))?;

        let socket_connections_active = IntGauge::new(
            "socket_connections_active",
            "Votifier socket connections currently open",
        )?;
        registry.register(Box::new(socket_connections_active.clone()))?;

        let cleanup_removed_total = IntCounter::new(
            "cleanup_removed_total",
            "Expired entries removed from the vote store",
        )?;
        registry.register(Box::new(cleanup_removed_total.clone()))?;

        Ok(Self {
            registry,
            votes_accepted_total,
            votes_rejected_total,
            socket_connections_total,
            socket_connections_active,
            cleanup_removed_total,
        })
    }

    pub fn record_accepted(&self, accepted: &AcceptedVote, transport: Transport) {
        self.votes_accepted_total
            .with_label_values(&[accepted.protocol.label(), transport.label()])
            .inc();
    }

    pub fn record_rejected(&self, error: &VoteError) {
        self.votes_rejected_total
            .with_label_values(&[error.kind()])
            .inc();
    }

    /// Encode all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl ConnectionObserver for NodeMetrics {
    fn connection_opened(&self) {
        self.socket_connections_total.inc();
        self.socket_connections_active.inc();
    }

    fn connection_closed(&self) {
        self.socket_connections_active.dec();
    }

    fn vote_accepted(&self, accepted: &AcceptedVote) {
        self.record_accepted(accepted, Transport::Socket);
    }

    fn vote_rejected(&self, error: &VoteError) {
        self.record_rejected(error);
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`. Returns 500 if encoding fails.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
