use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::correlation::EntryKind;

/// Delivery and poll counters for one integration
#[derive(Debug, Default)]
pub struct RelayMetrics {
    pub status_deliveries: AtomicU64,
    pub final_deliveries: AtomicU64,
    pub rejected_deliveries: AtomicU64,
    pub final_polls: AtomicU64,
    pub status_polls: AtomicU64,
    pub empty_polls: AtomicU64,
    pub entries_swept: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivery(&self, kind: EntryKind) {
        match kind {
            EntryKind::Status => self.status_deliveries.fetch_add(1, Ordering::Relaxed),
            EntryKind::Final => self.final_deliveries.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_rejected_delivery(&self) {
        self.rejected_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// `None` records a poll that found nothing.
    pub fn record_poll(&self, found: Option<EntryKind>) {
        let counter = match found {
            Some(EntryKind::Final) => &self.final_polls,
            Some(EntryKind::Status) => &self.status_polls,
            None => &self.empty_polls,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: usize) {
        self.entries_swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> RelayStats {
        RelayStats {
            status_deliveries: self.status_deliveries.load(Ordering::Relaxed),
            final_deliveries: self.final_deliveries.load(Ordering::Relaxed),
            rejected_deliveries: self.rejected_deliveries.load(Ordering::Relaxed),
            final_polls: self.final_polls.load(Ordering::Relaxed),
            status_polls: self.status_polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            entries_swept: self.entries_swept.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self, integration: &str) {
        let stats = self.get_stats();
        info!(
            integration,
            status_deliveries = stats.status_deliveries,
            final_deliveries = stats.final_deliveries,
            rejected_deliveries = stats.rejected_deliveries,
            final_polls = stats.final_polls,
            status_polls = stats.status_polls,
            empty_polls = stats.empty_polls,
            entries_swept = stats.entries_swept,
            "Relay metrics"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub status_deliveries: u64,
    pub final_deliveries: u64,
    pub rejected_deliveries: u64,
    pub final_polls: u64,
    pub status_polls: u64,
    pub empty_polls: u64,
    pub entries_swept: u64,
}

/// Span for one inbound webhook delivery
pub fn create_delivery_span(integration: &str, delivery_id: &str) -> tracing::Span {
    tracing::info_span!(
        "delivery",
        integration = integration,
        delivery.id = delivery_id,
        session.id = tracing::field::Empty,
        otel.kind = "server"
    )
}

/// Span for one client poll
pub fn create_poll_span(integration: &str, session_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "poll",
        integration = integration,
        session.id = session_id,
        otel.kind = "server"
    )
}
