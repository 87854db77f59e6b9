pub mod chat;
pub mod message;
pub mod session;
pub mod token;
pub mod user;

pub use chat::Chat;
pub use message::Message;
pub use session::AuthSession;
pub use token::PasswordResetToken;
pub use user::User;
