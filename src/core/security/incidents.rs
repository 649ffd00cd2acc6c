//! Security incidents and the bounded incident log.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncidentType {
    RepeatedAuthFailure,
    RateLimitAbuse,
    InternalError,
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RepeatedAuthFailure => "RepeatedAuthFailure",
            Self::RateLimitAbuse => "RateLimitAbuse",
            Self::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIncident {
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl SecurityIncident {
    pub fn new(incident_type: IncidentType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            incident_type,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Ring buffer of incidents plus lifetime per-type counters.
///
/// The buffer never holds more than `capacity` entries; counters are not
/// affected by eviction.
pub struct IncidentLog {
    capacity: usize,
    entries: VecDeque<SecurityIncident>,
    counts: BTreeMap<IncidentType, u64>,
    total: u64,
}

impl IncidentLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            counts: BTreeMap::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, incident: SecurityIncident) {
        *self.counts.entry(incident.incident_type).or_insert(0) += 1;
        self.total += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(incident);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn counts(&self) -> &BTreeMap<IncidentType, u64> {
        &self.counts
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityIncident> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Buffered incidents at or after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &SecurityIncident> {
        self.entries.iter().filter(move |i| i.timestamp >= since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_is_bounded() {
        let mut log = IncidentLog::new(3);
        for i in 0..10 {
            log.push(SecurityIncident::new(
                IncidentType::InternalError,
                Severity::Low,
                format!("incident {i}"),
            ));
            assert!(log.len() <= 3);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 10);
        assert_eq!(log.counts()[&IncidentType::InternalError], 10);
        // Oldest evicted first.
        assert_eq!(log.recent(1)[0].message, "incident 9");
        assert_eq!(log.recent(10)[2].message, "incident 7");
    }

    #[test]
    fn test_incident_serializes_type_field() {
        let incident = SecurityIncident::new(IncidentType::RateLimitAbuse, Severity::High, "x")
            .with_metadata("tokenId", "tok_1");
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["type"], "RateLimitAbuse");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["metadata"]["tokenId"], "tok_1");
    }
}
