//! Represents a logical bucket, the top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    pub id: Uuid,

    /// Globally unique bucket name (DNS naming rules).
    pub name: String,

    /// Region label, e.g. "local" or "us-west-2".
    pub region: String,

    pub created_at: DateTime<Utc>,
}

/// Check a bucket name against the S3 naming rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - starts and ends with a letter or digit
/// - no consecutive dots or dot-hyphen pairs
/// - not formatted like an IPv4 address
///
/// Returns the reason on failure.
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err("must be between 3 and 63 characters".into());
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err("allowed characters are lowercase letters, digits, dots, and hyphens".into());
    }

    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err("must start and end with a lowercase letter or digit".into());
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err("cannot contain consecutive dots or dot-hyphen combinations".into());
    }

    if is_ipv4_like(name) {
        return Err("must not be formatted like an IP address".into());
    }

    Ok(())
}

fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
