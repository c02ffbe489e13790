use thiserror::Error;

/// A prefix command typed in a text channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Join,
    /// Follow the author into another voice channel
    Move,
    Play(String),
    Skip,
    Queue,
    Disconnect,
    /// 1-based position as the user sees it in the queue listing
    Remove(usize),
    Clear,
    Loop,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Tell me what to play")]
    MissingQuery,
    #[error("'{0}' is not a queue position")]
    BadIndex(String),
}

impl BotCommand {
    /// Parses `content` if it starts with `prefix`. Returns `None` for
    /// messages that are not commands or name an unknown command.
    pub fn parse(prefix: &str, content: &str) -> Option<Result<Self, ParseError>> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        let command = match name.to_lowercase().as_str() {
            "join" | "j" => Ok(BotCommand::Join),
            "move" => Ok(BotCommand::Move),
            "play" | "p" => {
                if args.is_empty() {
                    Err(ParseError::MissingQuery)
                } else {
                    Ok(BotCommand::Play(args.to_string()))
                }
            }
            "skip" => Ok(BotCommand::Skip),
            "queue" | "q" => Ok(BotCommand::Queue),
            "disconnect" | "leave" | "dc" => Ok(BotCommand::Disconnect),
            "remove" => match args.parse::<usize>() {
                Ok(position) if position > 0 => Ok(BotCommand::Remove(position)),
                _ => Err(ParseError::BadIndex(args.to_string())),
            },
            "clear" => Ok(BotCommand::Clear),
            "loop" => Ok(BotCommand::Loop),
            _ => return None,
        };
        Some(command)
    }
}
