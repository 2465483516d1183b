//! Command parsing for the terminal front-end

use std::path::PathBuf;

pub const HELP: &str = "\
Commands:
  add [title]            add a script; enter its lines, then a single '.'
  import <file> [title]  add a script read from a file
  delete <script>        remove a script from the list
  run <script>           start a script
  run-all                start every script that is not running
  stop <script>          stop a running script
  stop-all               stop every running script
  list                   show scripts and their status
  history [count]        show recent starts and stops
  help                   show this help
  quit                   stop everything and exit

<script> is a title or a row number from 'list'.";

/// Default number of history rows shown
pub const DEFAULT_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { title: Option<String> },
    Import { path: PathBuf, title: Option<String> },
    Delete(String),
    Run(String),
    RunAll,
    Stop(String),
    StopAll,
    List,
    History(usize),
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. Errors are messages for the user.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let rest = (!rest.is_empty()).then(|| rest.to_string());

        match word.to_lowercase().as_str() {
            "add" | "new" => Ok(Command::Add { title: rest }),
            "import" => {
                let rest = rest.ok_or("Usage: import <file> [title]")?;
                let (path, title) = match rest.split_once(char::is_whitespace) {
                    Some((path, title)) => (path, Some(title.trim().to_string())),
                    None => (rest.as_str(), None),
                };
                Ok(Command::Import {
                    path: PathBuf::from(path),
                    title,
                })
            }
            "delete" | "rm" => required(rest, "delete").map(Command::Delete),
            "run" | "start" => required(rest, "run").map(Command::Run),
            "run-all" | "start-all" => Ok(Command::RunAll),
            "stop" => required(rest, "stop").map(Command::Stop),
            "stop-all" => Ok(Command::StopAll),
            "list" | "ls" => Ok(Command::List),
            "history" => match rest {
                None => Ok(Command::History(DEFAULT_HISTORY)),
                Some(count) => count
                    .parse()
                    .map(Command::History)
                    .map_err(|_| format!("Not a number: {}", count)),
            },
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "" => Err(String::new()),
            other => Err(format!("Unknown command '{}'. Type 'help'.", other)),
        }
    }
}

fn required(rest: Option<String>, name: &str) -> Result<String, String> {
    rest.ok_or_else(|| format!("Usage: {} <script>", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_titles_keep_inner_spaces() {
        assert_eq!(
            Command::parse("run  Start Kafka broker "),
            Ok(Command::Run("Start Kafka broker".to_string()))
        );
        assert_eq!(
            Command::parse("add"),
            Ok(Command::Add { title: None })
        );
        assert_eq!(
            Command::parse("ADD nightly build"),
            Ok(Command::Add {
                title: Some("nightly build".to_string())
            })
        );
    }

    #[test]
    fn test_import_with_and_without_title() {
        assert_eq!(
            Command::parse("import /tmp/a.sh"),
            Ok(Command::Import {
                path: PathBuf::from("/tmp/a.sh"),
                title: None
            })
        );
        assert_eq!(
            Command::parse("import /tmp/a.sh my script"),
            Ok(Command::Import {
                path: PathBuf::from("/tmp/a.sh"),
                title: Some("my script".to_string())
            })
        );
        assert!(Command::parse("import").is_err());
    }

    #[test]
    fn test_history_count() {
        assert_eq!(Command::parse("history"), Ok(Command::History(DEFAULT_HISTORY)));
        assert_eq!(Command::parse("history 5"), Ok(Command::History(5)));
        assert!(Command::parse("history many").is_err());
    }

    #[test]
    fn test_missing_argument_and_unknown_command() {
        assert_eq!(Command::parse("stop"), Err("Usage: stop <script>".to_string()));
        assert!(Command::parse("launch x").unwrap_err().contains("Unknown command"));
        assert_eq!(Command::parse("   "), Err(String::new()));
        assert_eq!(Command::parse("stop-all"), Ok(Command::StopAll));
    }
}
