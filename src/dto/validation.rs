//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::{game::SYSTEM_USER, room::same_user};

const MAX_ROOM_KEY_LENGTH: usize = 64;
const MAX_USER_NAME_LENGTH: usize = 32;

/// Validates that a room key is 1 to 64 ASCII letters, digits, `-` or `_`.
///
/// # Examples
///
/// ```ignore
/// validate_room_key("team-alpha")  // Ok
/// validate_room_key("team alpha")  // Err - space
/// validate_room_key("")            // Err - empty
/// ```
pub fn validate_room_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() || key.len() > MAX_ROOM_KEY_LENGTH {
        let mut err = ValidationError::new("room_key_length");
        err.message = Some(
            format!(
                "Room key must be between 1 and {MAX_ROOM_KEY_LENGTH} characters (got {})",
                key.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("room_key_format");
        err.message =
            Some("Room key must contain only letters, digits, `-` or `_`".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: trimmed, 1 to 32 characters, no control
/// characters, and not the name reserved for automatic game events.
pub fn validate_user_name(name: &str) -> Result<(), ValidationError> {
    let length = name.chars().count();
    if name.trim() != name || length == 0 || length > MAX_USER_NAME_LENGTH {
        let mut err = ValidationError::new("user_name_length");
        err.message = Some(
            format!(
                "Name must be 1 to {MAX_USER_NAME_LENGTH} characters without surrounding spaces"
            )
            .into(),
        );
        return Err(err);
    }

    if name.chars().any(char::is_control) {
        let mut err = ValidationError::new("user_name_format");
        err.message = Some("Name must not contain control characters".into());
        return Err(err);
    }

    if same_user(name, SYSTEM_USER) {
        let mut err = ValidationError::new("user_name_reserved");
        err.message = Some(format!("`{SYSTEM_USER}` is a reserved name").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_room_key_valid() {
        assert!(validate_room_key("team-alpha").is_ok());
        assert!(validate_room_key("SPRINT_42").is_ok());
        assert!(validate_room_key(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_room_key_invalid() {
        assert!(validate_room_key("").is_err());
        assert!(validate_room_key(&"a".repeat(65)).is_err());
        assert!(validate_room_key("team alpha").is_err()); // space
        assert!(validate_room_key("équipe").is_err()); // non-ascii
        assert!(validate_room_key("a/b").is_err());
    }

    #[test]
    fn test_validate_user_name() {
        assert!(validate_user_name("Alice").is_ok());
        assert!(validate_user_name("Zoë ☕").is_ok());
        assert!(validate_user_name("").is_err());
        assert!(validate_user_name(" Alice").is_err()); // padded
        assert!(validate_user_name(&"x".repeat(33)).is_err());
        assert!(validate_user_name("bad\nname").is_err());
        assert!(validate_user_name("System").is_err()); // reserved
    }
}
