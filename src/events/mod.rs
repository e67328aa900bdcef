use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the warehouse session core. Consumers (webhook
/// delivery, audit sinks) hang off the processing loop; emitting is
/// fire-and-forget and never fails the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    SessionCreated {
        session_id: Uuid,
        store_id: Uuid,
        order_count: usize,
    },
    PickingProgress {
        session_id: Uuid,
        product_id: Uuid,
        quantity_picked: i32,
    },
    PickingCompleted {
        session_id: Uuid,
    },
    PackUnitClaimed {
        session_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
    },
    SessionCompleted {
        session_id: Uuid,
        products: usize,
    },
    SessionAbandoned {
        session_id: Uuid,
        reason: String,
    },
    OrderReleased {
        session_id: Uuid,
        order_id: Uuid,
    },
    StockAdjusted {
        product_id: Uuid,
        previous_quantity: i32,
        new_quantity: i32,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Emit without failing the caller: a full or closed channel is logged
    /// and swallowed.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Event processing loop. Today this logs; downstream consumers subscribe
/// here when they arrive.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::SessionCreated {
                session_id,
                store_id,
                order_count,
            } => {
                info!(
                    session_id = %session_id,
                    store_id = %store_id,
                    order_count,
                    "warehouse session created"
                );
            }
            Event::PickingProgress {
                session_id,
                product_id,
                quantity_picked,
            } => {
                info!(
                    session_id = %session_id,
                    product_id = %product_id,
                    quantity_picked,
                    "picking progress recorded"
                );
            }
            Event::PickingCompleted { session_id } => {
                info!(session_id = %session_id, "session moved to packing");
            }
            Event::PackUnitClaimed {
                session_id,
                order_id,
                product_id,
            } => {
                info!(
                    session_id = %session_id,
                    order_id = %order_id,
                    product_id = %product_id,
                    "pack unit claimed"
                );
            }
            Event::SessionCompleted {
                session_id,
                products,
            } => {
                info!(session_id = %session_id, products, "warehouse session completed");
            }
            Event::SessionAbandoned { session_id, reason } => {
                info!(session_id = %session_id, reason = %reason, "warehouse session abandoned");
            }
            Event::OrderReleased {
                session_id,
                order_id,
            } => {
                info!(session_id = %session_id, order_id = %order_id, "order released from session");
            }
            Event::StockAdjusted {
                product_id,
                previous_quantity,
                new_quantity,
                reason,
                ..
            } => {
                info!(
                    product_id = %product_id,
                    previous_quantity,
                    new_quantity,
                    reason = %reason,
                    "stock adjusted"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}
