//! Organization model - the tenant boundary for dashboards and members.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 100;

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Organization {
    pub org_id: Uuid,
    #[schema(example = "Acme Corp")]
    pub org_name: String,
    #[schema(example = "acme")]
    pub org_slug: String,
    pub created_utc: DateTime<Utc>,
}

impl Organization {
    pub fn new(org_name: String, org_slug: String) -> Self {
        Self {
            org_id: Uuid::new_v4(),
            org_name,
            org_slug,
            created_utc: Utc::now(),
        }
    }
}

/// Slugs are 3-100 characters of `[a-z0-9-]` and may not start or end with `-`.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    let len = slug.chars().count();
    if !(SLUG_MIN_LEN..=SLUG_MAX_LEN).contains(&len) {
        return Err(format!(
            "Slug must be between {} and {} characters",
            SLUG_MIN_LEN, SLUG_MAX_LEN
        ));
    }

    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("Slug may only contain lowercase letters, digits and hyphens".to_string());
    }

    if slug.starts_with('-') || slug.ends_with('-') {
        return Err("Slug may not start or end with a hyphen".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_slugs() {
        for slug in ["acme", "acme-corp", "a1b", "team-42-ops"] {
            assert!(validate_slug(slug).is_ok(), "{slug} should be valid");
        }
        assert!(validate_slug(&"a".repeat(100)).is_ok());
    }

    #[test]
    fn rejects_bad_length() {
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug(&"a".repeat(101)).is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        for slug in ["Acme", "acme_corp", "acme corp", "acmé", "acme.io"] {
            assert!(validate_slug(slug).is_err(), "{slug} should be invalid");
        }
    }

    #[test]
    fn rejects_edge_hyphens() {
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("acme-").is_err());
        assert!(validate_slug("---").is_err());
    }
}
