// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Lets the CLI and
// tests observe deployment phase transitions and policy publications.
// Events are not persisted.

use crate::domain::app::AppId;
use crate::domain::events::{DeploymentEvent, PolicyEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Deployment(DeploymentEvent),
    Policy(PolicyEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_deployment_event(&self, event: DeploymentEvent) {
        self.publish(DomainEvent::Deployment(event));
    }

    pub fn publish_policy_event(&self, event: PolicyEvent) {
        self.publish(DomainEvent::Policy(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the deployment events of one app
    pub fn subscribe_app(&self, app_id: AppId) -> AppEventReceiver {
        AppEventReceiver {
            receiver: self.sender.subscribe(),
            app_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Receiver filtered to one app's deployment events
pub struct AppEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    app_id: AppId,
}

impl AppEventReceiver {
    pub async fn recv(&mut self) -> Result<DeploymentEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Deployment(deployment_event) = event {
                if deployment_event.app_id() == Some(self.app_id) {
                    return Ok(deployment_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::DeploymentPhase;
    use chrono::Utc;

    fn phase_change(app_id: i64, to: DeploymentPhase) -> DeploymentEvent {
        DeploymentEvent::PhaseChanged {
            app_id: AppId(app_id),
            deployment: format!("demo-{}", app_id),
            from: DeploymentPhase::Created,
            to,
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_deployment_event(phase_change(7, DeploymentPhase::Building));

        match receiver.recv().await.unwrap() {
            DomainEvent::Deployment(DeploymentEvent::PhaseChanged { app_id, to, .. }) => {
                assert_eq!(app_id, AppId(7));
                assert_eq!(to, DeploymentPhase::Building);
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_app_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_app(AppId(7));

        event_bus.publish_deployment_event(phase_change(71, DeploymentPhase::Running));
        event_bus.publish_policy_event(PolicyEvent::PolicyPublishFailed {
            policy_name: "rbac".to_string(),
            error: "down".to_string(),
            failed_at: Utc::now(),
        });
        event_bus.publish_deployment_event(phase_change(7, DeploymentPhase::Running));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.app_id(), Some(AppId(7)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_deployment_event(phase_change(7, DeploymentPhase::Stopped));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }
}
