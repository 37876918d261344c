use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

const PREFIX: &str = "verify_";

/// Standard alphabet with optional padding. URL-safe input is mapped onto it first,
/// so links built with either alphabet decode.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// What the website packs into the bot's `/start` deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPayload {
    pub email: String,
    pub referral_code: Option<String>,
}

/// Decodes `verify_<base64(email[|referral_code])>`, in either base64 alphabet.
pub fn decode_start_parameter(parameter: &str) -> Option<StartPayload> {
    let encoded = parameter.trim().strip_prefix(PREFIX)?;
    let normalised = encoded.replace('-', "+").replace('_', "/");
    let bytes = STANDARD_LENIENT.decode(normalised).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let (email, referral_code) = match decoded.split_once('|') {
        Some((email, code)) => (email, Some(code)),
        None => (decoded.as_str(), None),
    };
    if email.is_empty() {
        return None;
    }
    Some(StartPayload {
        email: email.to_string(),
        referral_code: referral_code
            .filter(|code| !code.is_empty())
            .map(str::to_string),
    })
}

pub fn encode_start_parameter(payload: &StartPayload) -> String {
    let raw = match &payload.referral_code {
        Some(code) => format!("{}|{}", payload.email, code),
        None => payload.email.clone(),
    };
    format!("{PREFIX}{}", URL_SAFE_NO_PAD.encode(raw))
}
