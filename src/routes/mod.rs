mod badge;
mod discord;
mod email;
mod frontend_redirect;
mod health_check;
mod root;
mod telegram;
mod twitter;

pub use badge::*;
pub use discord::*;
pub use email::*;
pub use frontend_redirect::FrontendRedirect;
pub use health_check::*;
pub use root::*;
pub use telegram::*;
pub use twitter::*;
