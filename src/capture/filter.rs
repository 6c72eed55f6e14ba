//! Request relevance rules for out-of-page capture

use serde::{Deserialize, Serialize};

/// Which exchanges count as the chat exchange of a trial
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestFilter {
    /// URLs containing any of these are never relevant
    pub excluded_fragments: Vec<String>,
    /// URLs ending in any of these are never relevant
    pub excluded_suffixes: Vec<String>,
    /// A GET is relevant only when its URL contains one of these
    pub streaming_markers: Vec<String>,
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self {
            excluded_fragments: ["/info", "/health", "/search", "/history"]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_suffixes: vec!["/api/".to_string()],
            streaming_markers: vec!["/stream".to_string(), "/runs".to_string()],
        }
    }
}

impl RequestFilter {
    /// Metadata/health style URL
    pub fn is_excluded(&self, url: &str) -> bool {
        self.excluded_fragments.iter().any(|f| url.contains(f.as_str()))
            || self.excluded_suffixes.iter().any(|s| url.ends_with(s.as_str()))
    }

    /// Mutations are relevant; GETs only when they look like a stream
    pub fn is_relevant(&self, method: &str, url: &str) -> bool {
        if self.is_excluded(url) {
            return false;
        }
        !method.eq_ignore_ascii_case("GET")
            || self.streaming_markers.iter().any(|m| url.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_rule() {
        let filter = RequestFilter::default();
        assert!(filter.is_excluded("http://a/api/info"));
        assert!(filter.is_excluded("http://a/api/health?x=1"));
        assert!(filter.is_excluded("http://a/api/threads/search"));
        assert!(filter.is_excluded("http://a/api/history/42"));
        assert!(filter.is_excluded("http://a/api/"));
        assert!(!filter.is_excluded("http://a/api/chat"));
    }

    #[test]
    fn test_relevance_rule() {
        let filter = RequestFilter::default();
        assert!(filter.is_relevant("POST", "http://a/api/chat"));
        assert!(filter.is_relevant("PUT", "http://a/api/threads/1"));
        assert!(!filter.is_relevant("POST", "http://a/api/info"));
        assert!(!filter.is_relevant("GET", "http://a/api/chat"));
        assert!(filter.is_relevant("GET", "http://a/api/chat/stream"));
        assert!(filter.is_relevant("get", "http://a/api/threads/1/runs"));
        assert!(!filter.is_relevant("GET", "http://a/api/"));
    }

    #[test]
    fn test_exclusion_wins_over_relevance() {
        let filter = RequestFilter::default();
        for method in ["GET", "POST"] {
            assert!(!filter.is_relevant(method, "http://a/api/info/nlq"));
            assert!(!filter.is_relevant(method, "http://a/api/health/runs/stream"));
            assert!(!filter.is_relevant(method, "http://a/threads/search/stream"));
        }
    }

    #[test]
    fn test_custom_rules_deserialize() {
        let filter: RequestFilter =
            serde_yaml::from_str("streaming_markers: [\"/events\"]").unwrap();
        assert!(filter.is_relevant("GET", "http://a/events"));
        assert!(!filter.is_relevant("GET", "http://a/stream"));
        assert!(filter.is_excluded("http://a/health"));
    }
}
