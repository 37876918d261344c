mod discord;
mod state;
mod twitter;

pub use discord::{DiscordClient, DiscordUser};
pub use state::{consume_state, generate_token, store_state, OAuthProvider, PendingAuthorization};
pub use twitter::{pkce_challenge, TwitterClient, TwitterUser};
