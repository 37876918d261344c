use validator::validate_email;

/// A syntactically valid, normalised (trimmed, lowercase) email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn parse(s: String) -> Result<UserEmail, String> {
        let normalised = s.trim().to_lowercase();
        if validate_email(&normalised) {
            Ok(Self(normalised))
        } else {
            Err(format!("{} is not a valid email address.", s))
        }
    }
}

/// First three characters followed by `***`, for messages that must not leak
/// another user's address.
pub(crate) fn mask_email(email: &str) -> String {
    let prefix: String = email.chars().take(3).collect();
    format!("{prefix}***")
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
