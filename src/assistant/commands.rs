use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "приветствие")]
    Start,
    #[command(description = "эта справка")]
    Help,
    #[command(description = "поиск по сотрудникам, мероприятиям и задачам")]
    Search(String),
    #[command(description = "JSON-запрос к базе")]
    Query(String),
    #[command(description = "то же, что /query")]
    DbQuery(String),
    #[command(description = "обработать готовый JSON намерения")]
    AskAi(String),
    #[command(description = "показать, как бот понял запрос")]
    Nlu(String),
    #[command(description = "список сотрудников")]
    GetEmployees,
    #[command(description = "добавить мероприятие (JSON)")]
    AddEvent(String),
    #[command(description = "добавить задачу (JSON)")]
    AddTask(String),
}

/// One incoming message, as the assistant sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Command(Command),
    UnknownCommand(String),
    Text(String),
}

impl Request {
    /// Classify message text. `bot_username` lets `/cmd@bot` forms through.
    pub fn parse(text: &str, bot_username: &str) -> Self {
        let text = text.trim();
        if !text.starts_with('/') {
            return Self::Text(text.to_string());
        }
        match Command::parse(text, bot_username) {
            Ok(command) => Self::Command(command),
            Err(_) => {
                let name = text.split_whitespace().next().unwrap_or(text);
                Self::UnknownCommand(name.to_string())
            }
        }
    }
}
