use rand::{seq::SliceRandom, Rng};

const CODE_LENGTH: usize = 8;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Per-user invitation code, eight characters drawn from `[A-Z0-9]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralCode(String);

impl ReferralCode {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::thread_rng())
    }

    pub fn generate_with_rng<R: Rng>(rng: &mut R) -> Self {
        let code = (0..CODE_LENGTH)
            .filter_map(|_| ALPHABET.choose(rng).map(|b| char::from(*b)))
            .collect();
        Self(code)
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim().to_uppercase();
        if s.len() == CODE_LENGTH && s.bytes().all(|b| ALPHABET.contains(&b)) {
            Ok(Self(s))
        } else {
            Err(format!("{s} is not a valid referral code."))
        }
    }

    /// Referral codes arrive from query strings and bot payloads; anything that
    /// does not look like a code is dropped instead of failing the request.
    pub fn parse_optional(s: Option<&str>) -> Option<Self> {
        s.filter(|s| !s.trim().is_empty())
            .and_then(|s| Self::parse(s).ok())
    }
}

impl AsRef<str> for ReferralCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
