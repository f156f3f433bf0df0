use crate::error::{AppError, Result};

/// Validates a login email.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }

    if email.len() > 255 {
        return Err(AppError::Validation(
            "Email must be at most 255 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validates a login password.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(AppError::Validation("A password is required".to_string()));
    }

    if password.len() > 128 {
        return Err(AppError::Validation(
            "Password must be at most 128 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_email_without_at_sign() {
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("").is_err());
        assert!(validate_email("user@example.com").is_ok());
    }

    #[test]
    fn rejects_empty_password() {
        assert!(validate_password("").is_err());
        assert!(validate_password("secret").is_ok());
    }
}
