use std::path::PathBuf;
use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use staffdesk::assistant::{Assistant, AssistantConfig, Request, TelegramClient};
use staffdesk::auth::{Access, AccessGate};
use staffdesk::backend::SupabaseClient;
use staffdesk::config::Config;
use staffdesk::{llm, telegram_log};

const DEFAULT_ENV_FILE: &str = ".env";

struct BotState {
    assistant: Assistant,
    telegram: TelegramClient,
    bot_username: String,
}

impl BotState {
    async fn new(config: &Config, bot: &Bot) -> Result<Self, String> {
        let llm = llm::from_config(config).map_err(|e| format!("LLM client: {e}"))?;
        let backend = SupabaseClient::new(
            &config.supabase_url,
            config.supabase_key.clone(),
            config.db_timeout,
            config.db_max_rows,
        )
        .map_err(|e| format!("Supabase client: {e}"))?;

        let gate = AccessGate::new(config.allowed_user_ids.clone());
        if gate.is_enabled() {
            info!("Authorization on ({} user(s))", config.allowed_user_ids.len());
        } else {
            warn!("ALLOWED_USER_IDS is empty, the bot answers everyone");
        }

        // Needed to accept "/command@botname" in groups
        let bot_username = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                me.username().to_string()
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                String::new()
            }
        };

        Ok(Self {
            assistant: Assistant::new(AssistantConfig::from(config), gate, llm, Arc::new(backend)),
            telegram: TelegramClient::new(bot.clone()),
            bot_username,
        })
    }
}

#[tokio::main]
async fn main() {
    let (env_file, explicit) = match std::env::args().nth(1) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_ENV_FILE), false),
    };
    let env_file = (explicit || env_file.exists()).then_some(env_file);

    let config = match Config::load(env_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.bot_token);

    // Setup logging
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("Failed to create log directory {}: {e}", config.log_dir.display());
        std::process::exit(1);
    }
    let file_appender = tracing_appender::rolling::never(&config.log_dir, "staffdesk.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id, "staffdesk");
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting staffdesk...");
    if let Some(path) = &env_file {
        info!("Loaded env file {}", path.display());
    }
    info!("LLM: {} ({}), timeout {:?}", config.llm_provider, config.llm_model, config.llm_timeout);
    info!("Backend: {} (max {} rows)", config.supabase_url, config.db_max_rows);

    let state = match BotState::new(&config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("Startup error: {e}");
            std::process::exit(1);
        }
    };

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let sender = msg.from.as_ref().map(|u| u.id);
    let request = Request::parse(text, &state.bot_username);
    let preview: String = text.chars().take(100).collect();
    info!("📨 {:?} in {}: \"{preview}\"", sender, msg.chat.id);

    if state.assistant.check_access(sender) == Access::Granted {
        state.telegram.typing(msg.chat.id).await;
    }

    let reply = state.assistant.handle(sender, request).await;
    // Failure is already logged by the client
    let _ = state.telegram.send_reply(msg.chat.id, &reply, Some(msg.id)).await;

    Ok(())
}
