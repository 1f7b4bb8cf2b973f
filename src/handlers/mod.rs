//! Built-in action handlers.

mod notify;
mod open_url;

pub use notify::NotifyHandler;
pub use open_url::OpenUrlHandler;
