//! Well-known application topics and the role → topic projection.
//!
//! The mapping is a pure function of [`DeviceRole`]: the initiator
//! publishes announcements and subscribes to results, the responder does
//! the reverse, and only the initiator serves the data-query topic. It is
//! fixed at configuration time and never mutated while a session is open.

use crate::config::DeviceRole;

/// The three well-known topics of the application protocol.
#[derive(Debug, Clone)]
pub struct TopicMap {
    /// Topic the initiator announces on.
    pub announce: String,

    /// Topic the responder publishes results on.
    pub results: String,

    /// Topic the data-query responder is declared on.
    pub data_query: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            announce: "app/announcements".to_string(),
            results: "app/results".to_string(),
            data_query: "app/data".to_string(),
        }
    }
}

impl TopicMap {
    /// Build a topic map from explicit names.
    pub fn new(
        announce: impl Into<String>,
        results: impl Into<String>,
        data_query: impl Into<String>,
    ) -> Self {
        Self {
            announce: announce.into(),
            results: results.into(),
            data_query: data_query.into(),
        }
    }

    /// Topic this role publishes on.
    pub fn outbound(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::Initiator => &self.announce,
            DeviceRole::Responder => &self.results,
        }
    }

    /// Topic this role subscribes to.
    pub fn inbound(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::Initiator => &self.results,
            DeviceRole::Responder => &self.announce,
        }
    }

    /// Topic this role answers queries on, if any.
    ///
    /// Only the initiator answers queries; the responder side issues them
    /// via `get()`.
    pub fn queryable(&self, role: DeviceRole) -> Option<&str> {
        match role {
            DeviceRole::Initiator => Some(&self.data_query),
            DeviceRole::Responder => None,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn roles_mirror_each_other() {
        // ---
        let topics = TopicMap::default();

        assert_eq!(
            topics.outbound(DeviceRole::Initiator),
            topics.inbound(DeviceRole::Responder)
        );
        assert_eq!(
            topics.inbound(DeviceRole::Initiator),
            topics.outbound(DeviceRole::Responder)
        );
    }

    #[test]
    fn only_initiator_answers_queries() {
        // ---
        let topics = TopicMap::new("a", "r", "q");

        assert_eq!(topics.queryable(DeviceRole::Initiator), Some("q"));
        assert_eq!(topics.queryable(DeviceRole::Responder), None);
    }
}
