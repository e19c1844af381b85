//! Store writer for validated water points.
//!
//! The store is reached through a [`StoreConnector`] that hands out one
//! [`StoreSession`] per operation. [`write`] and [`check_health`] open a
//! session, do exactly one thing with it, and close it on every exit path.
//! Nothing is pooled or retried here; both belong to the caller.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::WaterPoint;

mod influx;
#[cfg(test)]
pub mod memory;

pub use influx::InfluxConnector;

// ---

/// Failures raised by the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    // ---
    #[error("failed to build store client: {0}")]
    Client(String),

    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    pub ok: bool,
    pub count: usize,
}

/// Reachability of the store as seen by [`check_health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

/// Opens sessions against the time-series store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn StoreSession>, StoreError>;
}

/// A connection-scoped handle on the store.
#[async_trait]
pub trait StoreSession: Send {
    /// Write all points in one request.
    ///
    /// `Ok(false)` means the store answered without error but did not
    /// acknowledge the write.
    async fn write_points(&mut self, points: &[WaterPoint]) -> Result<bool, StoreError>;

    /// Liveness check.
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Release the session. The session is not used again afterwards.
    async fn close(&mut self);
}

/// Write `points` in a single request on a fresh session.
///
/// Callers are expected to skip empty batches; an empty slice is answered
/// with a negative result and never touches the store.
pub async fn write(
    connector: &dyn StoreConnector,
    points: &[WaterPoint],
) -> Result<WriteResult, StoreError> {
    // ---
    if points.is_empty() {
        return Ok(WriteResult {
            ok: false,
            count: 0,
        });
    }

    let mut session = connector.open().await?;
    let outcome = session.write_points(points).await;
    session.close().await;

    match outcome {
        Ok(true) => {
            tracing::info!("Successfully wrote {} points to store", points.len());
            Ok(WriteResult {
                ok: true,
                count: points.len(),
            })
        }
        Ok(false) => {
            tracing::error!("Store did not acknowledge write of {} points", points.len());
            Ok(WriteResult {
                ok: false,
                count: 0,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Store write failed");
            Err(e)
        }
    }
}

/// Check the store once. Never fails; errors become [`HealthStatus::Unhealthy`].
pub async fn check_health(connector: &dyn StoreConnector) -> HealthStatus {
    // ---
    let mut session = match connector.open().await {
        Ok(session) => session,
        Err(e) => return HealthStatus::Unhealthy(e.to_string()),
    };

    let outcome = session.ping().await;
    session.close().await;

    match outcome {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    }
}
