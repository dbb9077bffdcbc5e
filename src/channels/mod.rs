mod telegram;

pub use telegram::TelegramChannel;
