//! Stateful service classification
//!
//! Decides whether a service's mounts belong under the persistent data
//! directory or next to the application sources.

use crate::compose::document::Service;

/// Classifies services as stateful (database-like) or not
pub trait ServiceClassifier: Send + Sync {
    fn is_stateful(&self, service: &Service) -> bool;
}

/// Image families routed to the data directory
pub const DEFAULT_STATEFUL_PATTERNS: &[&str] = &[
    "mysql",
    "mariadb",
    "postgres",
    "postgis",
    "timescale",
    "mongo",
    "redis",
    "valkey",
    "keydb",
    "memcached",
    "elasticsearch",
    "opensearch",
    "meilisearch",
    "typesense",
    "solr",
    "influxdb",
    "couchdb",
    "cassandra",
    "scylla",
    "clickhouse",
    "rabbitmq",
    "minio",
];

/// Substring match on the image name
///
/// This is a heuristic: an image such as `my-postgres-frontend` matches too.
#[derive(Debug, Clone)]
pub struct ImagePatternClassifier {
    patterns: Vec<String>,
}

impl ImagePatternClassifier {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for ImagePatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_STATEFUL_PATTERNS.iter().copied())
    }
}

impl ServiceClassifier for ImagePatternClassifier {
    fn is_stateful(&self, service: &Service) -> bool {
        let Some(image) = service.image.as_deref() else {
            return false;
        };
        // Registry host and tag are not part of the name
        let name = image.rsplit('/').next().unwrap_or(image);
        let name = name.split([':', '@']).next().unwrap_or(name).to_lowercase();
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }
}
