//! Kubernetes events attached to pods

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};

use crate::error::Result;

/// Controller name events are reported under
pub const EVENT_REPORTER: &str = "csi-secrets-store-rotation";

/// Severity of a pod event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

/// Eventing collaborator of the rotation pipeline
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event against `object`
    async fn emit(
        &self,
        object: &ObjectReference,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// [`EventSink`] publishing through the kube event recorder
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    /// Create a sink reporting as [`EVENT_REPORTER`] from `instance`
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: EVENT_REPORTER.to_string(),
                instance,
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn emit(
        &self,
        object: &ObjectReference,
        kind: EventKind,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        recorder
            .publish(Event {
                type_: kind.into(),
                reason: reason.to_string(),
                note: Some(message.to_string()),
                action: "Rotate".to_string(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}
