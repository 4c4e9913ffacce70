//! Input checks for the login and registration forms.

use super::AuthError;

/// Minimum password length accepted at registration
const MIN_PASSWORD_LENGTH: usize = 6;

pub fn validate_login(username: &str, password: &str) -> Result<(), AuthError> {
    require(username, "Username is required")?;
    require(password, "Password is required")?;
    Ok(())
}

pub fn validate_registration(username: &str, password: &str, email: &str) -> Result<(), AuthError> {
    require(username, "Username is required")?;
    require(email, "Email is required")?;
    if !is_valid_email(email) {
        return Err(AuthError::Validation("Invalid email".to_string()));
    }
    require(password, "Password is required")?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

fn require(value: &str, message: &str) -> Result<(), AuthError> {
    if value.trim().is_empty() {
        Err(AuthError::Validation(message.to_string()))
    } else {
        Ok(())
    }
}

/// Loose `local@domain.tld` shape check; the backend does the real validation.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((name, tld)) => !name.is_empty() && !tld.is_empty(),
        None => false,
    }
}
