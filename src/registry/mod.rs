mod store;
mod types;

pub use store::Registry;
pub use types::{Bot, BotKind, BotSpec, BotStatus, RemoteAuth, RemoteTarget, Schedule};
