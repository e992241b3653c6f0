//! Admin-curated movie lists.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;

/// An ordered, admin-maintained list of movie slugs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedList {
    #[serde(default)]
    pub slug: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub movie_slugs: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

fn default_active() -> bool {
    true
}

impl CuratedList {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.slug.trim().is_empty() {
            return Err(DomainError::validation("curated list slug must not be empty"));
        }
        if self.label.trim().is_empty() {
            return Err(DomainError::validation("curated list label must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_blank_label() {
        let list = CuratedList {
            slug: "weekend-picks".into(),
            label: " ".into(),
            description: String::new(),
            movie_slugs: Vec::new(),
            is_active: true,
            display_order: 0,
            created_at: None,
            updated_at: None,
        };
        assert!(matches!(
            list.validate(),
            Err(DomainError::Validation { .. })
        ));
    }

    #[test]
    fn deserializes_with_defaults() {
        let list: CuratedList =
            serde_json::from_str(r#"{"slug":"cult","label":"Cult classics"}"#).expect("parse");
        assert!(list.is_active);
        assert!(list.movie_slugs.is_empty());
        assert_eq!(list.display_order, 0);
    }
}
