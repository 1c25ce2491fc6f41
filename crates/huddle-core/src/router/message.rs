//! Routed message types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoordinationError;

/// Kind of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A task handed to another worker.
    TaskDelegation,
    /// Request to verify a result.
    VerificationRequest,
    /// Invitation to join a collaboration.
    CollaborationInvite,
    /// Progress or state update.
    StatusUpdate,
    /// Result of a task.
    ResultReport,
    /// Something went wrong.
    ErrorNotification,
    /// Liveness signal.
    Heartbeat,
    /// Message sent to every worker.
    Broadcast,
}

impl MessageType {
    /// Returns the string representation of the message type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskDelegation => "task_delegation",
            Self::VerificationRequest => "verification_request",
            Self::CollaborationInvite => "collaboration_invite",
            Self::StatusUpdate => "status_update",
            Self::ResultReport => "result_report",
            Self::ErrorNotification => "error_notification",
            Self::Heartbeat => "heartbeat",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_delegation" => Ok(Self::TaskDelegation),
            "verification_request" => Ok(Self::VerificationRequest),
            "collaboration_invite" => Ok(Self::CollaborationInvite),
            "status_update" => Ok(Self::StatusUpdate),
            "result_report" => Ok(Self::ResultReport),
            "error_notification" => Ok(Self::ErrorNotification),
            "heartbeat" => Ok(Self::Heartbeat),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(CoordinationError::invalid_input(
                "message_type",
                format!("unknown message type '{}'", other),
            )),
        }
    }
}

/// Delivery priority. Higher values are delivered first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    /// Background traffic.
    Low = 1,
    /// Default priority.
    #[default]
    Normal = 2,
    /// Ahead of normal traffic.
    High = 3,
    /// Ahead of everything else.
    Urgent = 4,
}

impl MessagePriority {
    /// Returns the string representation of the priority.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Delivery state of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Queued, not yet delivered.
    Pending,
    /// Handed to the recipient.
    Delivered,
    /// Gave up after the maximum number of attempts.
    Failed,
    /// Expired before delivery.
    Expired,
}

impl DeliveryStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// Default number of delivery attempts per message.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Message submitted for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind.
    pub message_type: MessageType,
    /// Delivery priority.
    #[serde(default)]
    pub priority: MessagePriority,
    /// Opaque payload.
    #[serde(default)]
    pub content: Value,
    /// Time to live; `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Duration>,
    /// Delivery attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_delivery_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}

impl Envelope {
    /// Creates an envelope with normal priority and no expiry.
    pub fn new(message_type: MessageType, content: Value) -> Self {
        Self {
            message_type,
            priority: MessagePriority::Normal,
            content,
            ttl: None,
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A message accepted by the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedMessage {
    /// Router-assigned id.
    pub message_id: String,
    /// Sender.
    pub from_worker: String,
    /// Recipient.
    pub to_worker: String,
    /// Message kind.
    pub message_type: MessageType,
    /// Delivery priority.
    pub priority: MessagePriority,
    /// Opaque payload.
    pub content: Value,
    /// Acceptance time.
    pub created_at: DateTime<Utc>,
    /// Expiry time, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// Attempts made so far.
    pub delivery_attempts: u32,
    /// Attempts allowed.
    pub max_delivery_attempts: u32,
    /// Current delivery state.
    pub status: DeliveryStatus,
}

impl RoutedMessage {
    pub(crate) fn new(from: &str, to: &str, envelope: Envelope) -> Self {
        let created_at = Utc::now();
        let expires_at = envelope
            .ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| created_at.checked_add_signed(ttl));
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from_worker: from.to_string(),
            to_worker: to.to_string(),
            message_type: envelope.message_type,
            priority: envelope.priority,
            content: envelope.content,
            created_at,
            expires_at,
            delivery_attempts: 0,
            max_delivery_attempts: envelope.max_delivery_attempts.max(1),
            status: DeliveryStatus::Pending,
        }
    }

    /// Returns `true` if the message expired before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// Outcome of one delivery, kept in the router's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryRecord {
    /// Message id.
    pub message_id: String,
    /// Sender.
    pub from_worker: String,
    /// Recipient.
    pub to_worker: String,
    /// Final status of this attempt.
    pub status: DeliveryStatus,
    /// Attempts made.
    pub attempts: u32,
    /// Time between acceptance and this outcome, in milliseconds.
    pub latency_ms: f64,
    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trip_through_str() {
        for message_type in [MessageType::TaskDelegation, MessageType::Heartbeat] {
            assert_eq!(message_type.as_str().parse::<MessageType>().unwrap(), message_type);
        }
        assert!("carrier_pigeon".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(MessagePriority::Urgent > MessagePriority::High);
        assert!(MessagePriority::Low < MessagePriority::Normal);
        assert_eq!(MessagePriority::Urgent as u8, 4);
    }

    #[test]
    fn test_expiry() {
        let message = RoutedMessage::new(
            "a",
            "b",
            Envelope::new(MessageType::StatusUpdate, Value::Null).with_ttl(Duration::from_secs(1)),
        );
        assert!(!message.is_expired_at(message.created_at));
        assert!(message.is_expired_at(message.created_at + chrono::Duration::seconds(2)));

        let forever = RoutedMessage::new("a", "b", Envelope::new(MessageType::Heartbeat, Value::Null));
        assert!(forever.expires_at.is_none());
    }
}
