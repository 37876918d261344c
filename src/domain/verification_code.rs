use rand::Rng;

const CODE_LENGTH: usize = 6;

/// Six-digit one-time code mailed to a user to prove ownership of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..CODE_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10)))
            .collect();
        Self(code)
    }

    /// Codes submitted by users are accepted only in their canonical shape.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.len() == CODE_LENGTH && s.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(format!("{s} is not a valid verification code."))
        }
    }
}

impl AsRef<str> for VerificationCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
