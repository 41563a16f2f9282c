//! Shared identifier types and parse helpers.

use uuid::Uuid;

/// Order identifier (UUID v4).
pub type OrderId = Uuid;
/// Position identifier (UUID v4).
pub type PositionId = Uuid;
/// User identifier.
pub type UserId = Uuid;

/// Error returned when a user id cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid user id: {0}")]
pub struct UserIdParseError(pub String);

/// Parse a user id from its wire representation.
///
/// Accepts both canonical UUIDs and bare integers. An integer `N` maps to
/// the UUID `00000000-0000-0000-0000-{N:012}` so that legacy numeric
/// accounts and UUID accounts share one keyspace.
pub fn parse_user_id(raw: &str) -> Result<UserId, UserIdParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UserIdParseError(raw.to_string()));
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        let candidate = format!("00000000-0000-0000-0000-{trimmed:0>12}");
        return Uuid::parse_str(&candidate).map_err(|_| UserIdParseError(raw.to_string()));
    }
    Uuid::parse_str(trimmed).map_err(|_| UserIdParseError(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_id_coercion() {
        let id = parse_user_id("42").unwrap();
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000042");

        let id = parse_user_id("999999999999").unwrap();
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-999999999999");
    }

    #[test]
    fn test_uuid_passthrough() {
        let raw = "a1a2a3a4-b1b2-c1c2-d1d2-e1e2e3e4e5e6";
        assert_eq!(parse_user_id(raw).unwrap().to_string(), raw);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_user_id("").is_err());
        assert!(parse_user_id("not-a-user").is_err());
        // 13 digits no longer fit the zero-padded tail
        assert!(parse_user_id("9999999999999").is_err());
    }
}
