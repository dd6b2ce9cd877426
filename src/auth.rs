use std::collections::HashSet;

use teloxide::types::UserId;

/// Fixed reply for senders outside the allow-list.
pub const DENIED_MESSAGE: &str = "🚫 Вы не авторизованы для использования этого бота.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    Denied,
}

/// Static allow-list of Telegram user IDs.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    allowed: HashSet<UserId>,
}

impl AccessGate {
    pub fn new(allowed: HashSet<UserId>) -> Self {
        Self { allowed }
    }

    /// An empty list disables the check.
    pub fn is_enabled(&self) -> bool {
        !self.allowed.is_empty()
    }

    /// Updates without a sender are denied unless the check is disabled.
    pub fn check(&self, sender: Option<UserId>) -> Access {
        if !self.is_enabled() {
            return Access::Granted;
        }
        match sender {
            Some(id) if self.allowed.contains(&id) => Access::Granted,
            _ => Access::Denied,
        }
    }
}
