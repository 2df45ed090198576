//! Live events pushed over WebSocket, and the messages clients send back

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::queue::QueueEntryView;

/// Server-to-client event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Full active-queue snapshot for a salon
    QueueUpdated {
        salon_id: i32,
        queue: Vec<QueueEntryView>,
    },
    /// A customer just joined (drives voice/visual alerts on dashboards)
    QueueJoined {
        salon_id: i32,
        entry: QueueEntryView,
    },
    PositionUpdated {
        salon_id: i32,
        entry_id: Uuid,
        position: i32,
        total_active: i32,
    },
    CustomerArrived {
        salon_id: i32,
        entry_id: Uuid,
        customer_id: i32,
    },
    ServiceStarting {
        salon_id: i32,
        entry_id: Uuid,
        customer_id: i32,
    },
    ServiceCompleted {
        salon_id: i32,
        entry_id: Uuid,
        customer_id: i32,
        points_awarded: i32,
    },
    NoShow {
        salon_id: i32,
        entry_id: Uuid,
        customer_id: i32,
        reason: Option<String>,
    },
    ViewerCount {
        salon_id: i32,
        count: usize,
    },
    Authenticated {
        user_id: i32,
    },
    /// Reply to a client `ping`
    Pong,
    Error {
        message: String,
    },
}

/// Client-to-server message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate { token: String },
    ViewSalon { salon_id: i32 },
    LeaveSalon,
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = QueueEvent::ViewerCount {
            salon_id: 3,
            count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "viewer_count");
        assert_eq!(json["salon_id"], 3);
    }

    #[test]
    fn test_client_message_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"view_salon","salon_id":9}"#).unwrap();
        assert!(matches!(msg, ClientMessage::ViewSalon { salon_id: 9 }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"leave_salon"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::LeaveSalon));
    }
}
