//! Event Record - immutable tracking events (views, clicks, conversions)

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Kind of tracked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Variant was rendered to the session (an impression).
    View,
    /// Session clicked a tracked target.
    Click,
    /// Session completed a conversion.
    Conversion,
}

impl EventKind {
    /// Kind name as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Click => "click",
            Self::Conversion => "conversion",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Self::View),
            "click" => Ok(Self::Click),
            "conversion" => Ok(Self::Conversion),
            other => Err(Error::InvalidKind(other.to_string())),
        }
    }
}

/// Optional request context captured with an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventMetadata {
    /// Visitor user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Referring URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl EventMetadata {
    /// Whether no context was captured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_agent.is_none() && self.referrer.is_none()
    }
}

/// Event Record is a single tracked interaction.
///
/// Records are created once at ingestion and never mutated. The event log
/// is append-only; aggregate counters are derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    experiment_id: String,
    variant_id: String,
    session_key: String,
    kind: EventKind,
    subtype: Option<String>,
    #[serde(default, skip_serializing_if = "EventMetadata::is_empty")]
    metadata: EventMetadata,
    timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Create a new event record stamped with the current time.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        session_key: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        EventRecordBuilder::new(experiment_id, variant_id, session_key, kind).build()
    }

    /// Create a builder for an event with subtype/metadata.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        session_key: impl Into<String>,
        kind: EventKind,
    ) -> EventRecordBuilder {
        EventRecordBuilder::new(experiment_id, variant_id, session_key, kind)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the session key.
    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Get the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Conversion type or click target, if any.
    #[must_use]
    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    /// Request context.
    #[must_use]
    pub const fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Ingestion timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for `EventRecord`.
#[derive(Debug)]
pub struct EventRecordBuilder {
    experiment_id: String,
    variant_id: String,
    session_key: String,
    kind: EventKind,
    subtype: Option<String>,
    metadata: EventMetadata,
    timestamp: DateTime<Utc>,
}

impl EventRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        session_key: impl Into<String>,
        kind: EventKind,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            variant_id: variant_id.into(),
            session_key: session_key.into(),
            kind,
            subtype: None,
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
        }
    }

    /// Set the subtype (conversion type / click target).
    #[must_use]
    pub fn subtype(mut self, subtype: Option<String>) -> Self {
        self.subtype = subtype;
        self
    }

    /// Set the request context.
    #[must_use]
    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set a custom timestamp (useful for replay/testing).
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `EventRecord`.
    #[must_use]
    pub fn build(self) -> EventRecord {
        EventRecord {
            experiment_id: self.experiment_id,
            variant_id: self.variant_id,
            session_key: self.session_key,
            kind: self.kind,
            subtype: self.subtype,
            metadata: self.metadata,
            timestamp: self.timestamp,
        }
    }
}
