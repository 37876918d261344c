mod bot;
mod client;
mod deep_link;

pub use bot::{run_worker_until_stopped, VerificationBot};
pub use client::{
    Chat, ChatMember, ChatMemberUpdated, Message, TelegramApiError, TelegramClient, TelegramUser,
    Update,
};
pub use deep_link::{decode_start_parameter, encode_start_parameter, StartPayload};
