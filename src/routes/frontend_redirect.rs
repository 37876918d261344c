use axum::response::{IntoResponse, Redirect, Response};
use reqwest::Url;

/// Redirect back to the website after an OAuth callback, e.g.
/// `<frontend>?platform=discord&status=success&username=ursula&ref=ABCD1234`.
pub struct FrontendRedirect {
    url: Url,
    referral_code: Option<String>,
}

impl FrontendRedirect {
    pub fn new(frontend_url: &Url, platform: &str, status: &str) -> Self {
        let mut url = frontend_url.clone();
        url.query_pairs_mut()
            .append_pair("platform", platform)
            .append_pair("status", status);
        Self {
            url,
            referral_code: None,
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn message(self, message: &str) -> Self {
        self.param("message", message)
    }

    /// The referral code travels last so the website can keep it across steps.
    pub fn referral(mut self, referral_code: Option<&str>) -> Self {
        self.referral_code = referral_code
            .filter(|code| !code.is_empty())
            .map(str::to_string);
        self
    }

    pub fn url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(code) = &self.referral_code {
            url.query_pairs_mut().append_pair("ref", code);
        }
        url
    }
}

impl IntoResponse for FrontendRedirect {
    fn into_response(self) -> Response {
        Redirect::temporary(self.url().as_str()).into_response()
    }
}
