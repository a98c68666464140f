//! Action model - what a user interaction wants the store to look like
//!
//! An interaction is described by its [`ActionKind`], the target it mutates
//! (a photo, an album, a notification) and the [`Payload`] holding the latest
//! desired end state for that target. Kinds are grouped into [`Lane`]s: the
//! pending state, merge policy and flush call are all per lane.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Tag identifying an action family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Set like state for a photo or album
    Like,
    /// Mark one notification seen
    NotificationSeen,
    /// Dismiss one notification (implies seen)
    NotificationDismiss,
    /// Mark every listed notification seen
    MarkAllSeen,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::Like,
        ActionKind::NotificationSeen,
        ActionKind::NotificationDismiss,
        ActionKind::MarkAllSeen,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::NotificationSeen => "notification-seen",
            ActionKind::NotificationDismiss => "notification-dismiss",
            ActionKind::MarkAllSeen => "mark-all-seen",
        }
    }

    /// The flush lane this kind is coalesced in.
    pub fn lane(self) -> Lane {
        match self {
            ActionKind::Like => Lane::Likes,
            ActionKind::NotificationSeen
            | ActionKind::NotificationDismiss
            | ActionKind::MarkAllSeen => Lane::Notifications,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SyncError::Configuration(format!("unknown action kind: {}", s)))
    }
}

/// Flush family. One pending map, one merge policy and one outbound flush
/// per lane per debounce cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Per-target lane: every target gets its own write
    Likes,
    /// Batchable lane: all targets share one write
    Notifications,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Likes, Lane::Notifications];

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Likes => "likes",
            Lane::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Likeable entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Photo,
    Album,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Photo => "photo",
            EntityType::Album => "album",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(EntityType::Photo),
            "album" => Ok(EntityType::Album),
            other => Err(SyncError::Configuration(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

/// Notification state requested by the user. Ordered so that the
/// stronger mark wins a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationMark {
    Seen,
    Dismissed,
}

/// Latest desired end state for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Like {
        entity_type: EntityType,
        entity_id: String,
        liked: bool,
    },
    Notification {
        notification_id: String,
        mark: NotificationMark,
    },
}

impl Payload {
    pub fn like(entity_type: EntityType, entity_id: impl Into<String>, liked: bool) -> Self {
        Payload::Like {
            entity_type,
            entity_id: entity_id.into(),
            liked,
        }
    }

    pub fn notification(notification_id: impl Into<String>, mark: NotificationMark) -> Self {
        Payload::Notification {
            notification_id: notification_id.into(),
            mark,
        }
    }

    /// Lane whose handler understands this payload.
    pub fn lane(&self) -> Lane {
        match self {
            Payload::Like { .. } => Lane::Likes,
            Payload::Notification { .. } => Lane::Notifications,
        }
    }

    /// Canonical target key (`photo:abc123`, or the notification id).
    pub fn target_key(&self) -> String {
        match self {
            Payload::Like {
                entity_type,
                entity_id,
                ..
            } => like_target_key(*entity_type, entity_id),
            Payload::Notification {
                notification_id, ..
            } => notification_id.clone(),
        }
    }
}

pub fn like_target_key(entity_type: EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

/// One outstanding mutation intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Kind of the most recent intent merged into this entry
    pub kind: ActionKind,
    /// Target within the lane
    pub target_key: String,
    /// Merged end state
    pub payload: Payload,
    /// First queued since the last flush (diagnostics only)
    pub registered_at: DateTime<Utc>,
}
