mod referral_code;
mod tasks;
mod telegram_login;
mod user_email;
mod verification_code;

pub use referral_code::ReferralCode;
pub use tasks::TaskStatus;
pub use telegram_login::{sign as sign_telegram_login, TelegramLogin, TelegramLoginError};
pub(crate) use user_email::mask_email;
pub use user_email::UserEmail;
pub use verification_code::VerificationCode;
