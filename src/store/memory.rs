//! In-memory store used by tests.
//!
//! Points are keyed by `(measurement, tags, timestamp)` so a rewrite replaces
//! the stored fields, like InfluxDB does. Session open/close calls are
//! counted so tests can check that every session is released.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{StoreConnector, StoreError, StoreSession};
use crate::models::{WaterFields, WaterPoint, WaterTags};

type Identity = (&'static str, WaterTags, DateTime<Utc>);

/// How sessions handed out by a [`MemoryStore`] respond.
#[derive(Debug, Clone)]
pub enum Behavior {
    Accept,
    Unacknowledged,
    Fail(String),
    RefuseOpen(String),
}

#[derive(Default)]
struct Inner {
    points: Mutex<HashMap<Identity, WaterFields>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    behavior: Behavior,
}

struct MemorySession {
    inner: Arc<Inner>,
    behavior: Behavior,
}

fn identity(point: &WaterPoint) -> Identity {
    (point.measurement, point.tags.clone(), point.timestamp)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_behavior(Behavior::Accept)
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            behavior,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.points.lock().unwrap().len()
    }

    pub fn get(&self, point: &WaterPoint) -> Option<WaterFields> {
        self.inner.points.lock().unwrap().get(&identity(point)).cloned()
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn open(&self) -> Result<Box<dyn StoreSession>, StoreError> {
        if let Behavior::RefuseOpen(reason) = &self.behavior {
            return Err(StoreError::Unavailable(reason.clone()));
        }

        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            behavior: self.behavior.clone(),
        }))
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn write_points(&mut self, points: &[WaterPoint]) -> Result<bool, StoreError> {
        match &self.behavior {
            Behavior::Accept => {
                let mut stored = self.inner.points.lock().unwrap();
                for point in points {
                    stored.insert(identity(point), point.fields.clone());
                }
                Ok(true)
            }
            Behavior::Unacknowledged => Ok(false),
            Behavior::Fail(reason) | Behavior::RefuseOpen(reason) => {
                Err(StoreError::Unavailable(reason.clone()))
            }
        }
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        match &self.behavior {
            Behavior::Fail(reason) => Err(StoreError::Unavailable(reason.clone())),
            _ => Ok(()),
        }
    }

    async fn close(&mut self) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}
