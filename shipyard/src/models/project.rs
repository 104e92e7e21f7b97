//! Project models

use serde::{Deserialize, Serialize};

use crate::errors::ShipyardError;

/// How a project's composition document comes to exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectKind {
    /// Generated by the platform from a named template (static site, flask, ...)
    Templated { template: String },

    /// User-authored composition, re-imported after every pull
    CustomComposition,
}

impl ProjectKind {
    pub fn is_custom(&self) -> bool {
        matches!(self, ProjectKind::CustomComposition)
    }
}

/// A deployed project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub owner: String,
    pub name: String,
    pub kind: ProjectKind,
}

impl Project {
    /// Namespace prefix applied to container identities
    pub fn prefix(&self) -> String {
        project_prefix(&self.owner, &self.name)
    }
}

/// Joins owner and name in a prefix; never valid inside a name
pub const PREFIX_SEPARATOR: char = '_';

/// `owner_name`, the namespace of a project's containers
///
/// Names accepted by `validate_name` map one-to-one onto prefixes. Anything
/// else is folded onto `-` so the result stays a valid container name.
pub fn project_prefix(owner: &str, name: &str) -> String {
    format!("{}{}{}", sanitize(owner), PREFIX_SEPARATOR, sanitize(name))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' | '.' => c,
            _ => '-',
        })
        .collect()
}

/// Owner and project names become path segments under the data directory
/// and halves of the container prefix: lowercase letters, digits, `-` and
/// `.`, starting with a letter or digit
pub fn validate_name(name: &str) -> Result<(), ShipyardError> {
    let valid = name.len() <= 64
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ShipyardError::InvalidRequest(format!("invalid name: {:?}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_sanitized() {
        assert_eq!(project_prefix("alice", "blog"), "alice_blog");
        assert_eq!(project_prefix("bob", "my blog"), "bob_my-blog");
    }

    #[test]
    fn test_distinct_projects_get_distinct_prefixes() {
        assert_ne!(project_prefix("alice", "blog-x"), project_prefix("alice-blog", "x"));
        assert_ne!(project_prefix("alice.blog", "x"), project_prefix("alice", "blog.x"));
    }

    #[test]
    fn test_kind_serde() {
        let kind = ProjectKind::Templated {
            template: "python-flask".to_string(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#"{"kind":"templated","template":"python-flask"}"#);
        let custom: ProjectKind = serde_json::from_str(r#"{"kind":"custom_composition"}"#).unwrap();
        assert!(custom.is_custom());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("my-site.v2").is_ok());
        assert!(validate_name("2048").is_ok());
        assert!(validate_name("Alice").is_err());
        assert!(validate_name("api_v2").is_err());
        assert!(validate_name("-blog").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a b").is_err());
    }
}
