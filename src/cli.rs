use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "taskdesk",
    version,
    about = "Background task desk for dataset analysis and chat",
    long_about = "Runs dataset analysis and chat requests as background tasks.\n\
                  Settings are read from an optional TOML file, .env and the environment."
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive task menu (default)
    Menu,
    /// Analyze every CSV file in a directory and wait for the reports
    Analyze(AnalyzeArgs),
    /// Send one message to the chat API and print the answer
    Chat(ChatArgs),
    /// Show the remaining chat API balance
    Balance,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Directory holding the CSV files
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Maximum slices per column before the tail is merged
    #[arg(long)]
    pub max_categories: Option<usize>,

    /// Directory the JSON reports are written to
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Message to send
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_menu() {
        let cli = Cli::try_parse_from(["taskdesk"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_analyze_args() {
        let cli = Cli::try_parse_from([
            "taskdesk",
            "analyze",
            "--dir",
            "data",
            "--max-categories",
            "5",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Command::Analyze(args)) => {
                assert_eq!(args.dir, Some(PathBuf::from("data")));
                assert_eq!(args.max_categories, Some(5));
                assert!(args.output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_chat_requires_message() {
        assert!(Cli::try_parse_from(["taskdesk", "chat"]).is_err());
        let cli = Cli::try_parse_from(["taskdesk", "--config", "app.toml", "chat", "hi"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("app.toml")));
        assert!(matches!(cli.command, Some(Command::Chat(ChatArgs { ref message })) if message == "hi"));
    }
}
