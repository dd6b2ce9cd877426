//! Assistant module - answers staff questions from the company database.

pub mod commands;
pub mod engine;
pub mod format;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use commands::{Command, Request};
pub use engine::{Assistant, AssistantConfig};
pub use telegram::TelegramClient;
