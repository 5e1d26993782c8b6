use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tokio::sync::Mutex;
use tracing::debug;

pub const REASON_CREATED: &str = "Created";
pub const REASON_UPDATED: &str = "Updated";
pub const REASON_DELETED: &str = "Deleted";
pub const REASON_INVALID_DOMAIN: &str = "InvalidDomain";
pub const REASON_DOMAIN_PUBLISHED: &str = "DomainPublished";
pub const REASON_STRATEGY_PUBLISHED: &str = "EndpointPublishingStrategyPublished";
pub const REASON_FINALIZED: &str = "Finalized";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Best-effort sink for Kubernetes Events about a regarding object.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: String,
    );
}

pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: String,
    ) {
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        if let Err(e) = self
            .recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: reason.into(),
                    secondary: None,
                },
                regarding,
            )
            .await
        {
            debug!(error = %e, %reason, "failed to publish event");
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub regarding: String,
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
}

/// Keeps events in memory; used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: String,
    ) {
        let regarding = match (&regarding.namespace, &regarding.name) {
            (Some(ns), Some(name)) => format!("{}/{}", ns, name),
            (None, Some(name)) => name.clone(),
            _ => String::new(),
        };
        self.events.lock().await.push(RecordedEvent {
            regarding,
            kind,
            reason: reason.to_string(),
            note,
        });
    }
}
