pub mod assistant;
pub mod auth;
pub mod backend;
pub mod composer;
pub mod config;
pub mod context;
pub mod llm;
pub mod nlu;
pub mod telegram_log;
