//! Database endpoints and sync direction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One database endpoint the pipeline can read from or write to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    /// Human-readable label ("local", "production")
    pub label: String,

    /// Database host
    #[serde(default = "default_host")]
    pub host: String,

    /// Database port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name
    pub database: String,

    /// Database user
    pub user: String,

    /// Container name, when the database runs inside a container and
    /// commands must be executed through the container runtime
    #[serde(default)]
    pub container: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}@{}:{}/{})", self.label, self.user, self.host, self.port, self.database)
    }
}

/// Direction of a sync. The two directions are symmetric: swapping
/// endpoints is the only difference between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local is the source, remote is the target
    Push,
    /// Remote is the source, local is the target
    Pull,
}

impl Direction {
    /// Resolve (source, target) from the configured endpoint pair.
    pub fn resolve<'a>(&self, local: &'a Endpoint, remote: &'a Endpoint) -> (&'a Endpoint, &'a Endpoint) {
        match self {
            Direction::Push => (local, remote),
            Direction::Pull => (remote, local),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Endpoint, Endpoint) {
        let local = Endpoint {
            label: "local".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "app".to_string(),
            container: None,
        };
        let remote = Endpoint {
            label: "production".to_string(),
            host: "db.internal".to_string(),
            port: 5432,
            database: "app".to_string(),
            user: "app".to_string(),
            container: Some("app-db".to_string()),
        };
        (local, remote)
    }

    #[test]
    fn test_directions_are_symmetric() {
        let (local, remote) = pair();

        let (src, tgt) = Direction::Push.resolve(&local, &remote);
        assert_eq!(src.label, "local");
        assert_eq!(tgt.label, "production");

        let (src, tgt) = Direction::Pull.resolve(&local, &remote);
        assert_eq!(src.label, "production");
        assert_eq!(tgt.label, "local");
    }

    #[test]
    fn test_display() {
        let (local, _) = pair();
        assert_eq!(local.to_string(), "local (app@localhost:5432/app)");
        assert_eq!(Direction::Pull.to_string(), "pull");
    }
}
