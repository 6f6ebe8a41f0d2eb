use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "wscmd", version, about = "Interactive console for multiple WebSocket connections")]
pub struct Args {
    /// WebSocket URLs to connect to (ws:// or wss://)
    pub urls: Vec<String>,

    /// Command document file name
    #[arg(long = "cmd", value_name = "FILE", default_value = "command")]
    pub command_file: String,

    /// History file name
    #[arg(long = "history", value_name = "FILE", default_value = "history")]
    pub history_file: String,

    /// Project name; uses <NAME>-command and <NAME>-history
    #[arg(long = "prj", value_name = "NAME")]
    pub project: Option<String>,

    /// Reconnect delay in milliseconds after a connection closes (0 = never)
    #[arg(long, value_name = "MILLIS", default_value_t = 0)]
    pub reconnect: u64,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

/// Resolved startup options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub urls: Vec<String>,
    pub command_file: PathBuf,
    pub history_file: PathBuf,
    pub reconnect: Option<Duration>,
    pub debug: bool,
}

impl Settings {
    pub fn from_args(args: Args, cwd: &Path) -> Self {
        let (command_file, history_file) = match args.project.as_deref().map(str::trim) {
            Some(project) if !project.is_empty() => {
                (format!("{project}-command"), format!("{project}-history"))
            }
            _ => (args.command_file, args.history_file),
        };
        Self {
            urls: args.urls,
            command_file: cwd.join(command_file),
            history_file: cwd.join(history_file),
            reconnect: (args.reconnect > 0).then(|| Duration::from_millis(args.reconnect)),
            debug: args.debug,
        }
    }

    /// `$PWD` when set, otherwise the process working directory.
    pub fn working_dir() -> std::io::Result<PathBuf> {
        match std::env::var_os("PWD") {
            Some(pwd) if !pwd.is_empty() => Ok(PathBuf::from(pwd)),
            _ => std::env::current_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(argv: &[&str]) -> Settings {
        let args = Args::try_parse_from(std::iter::once("wscmd").chain(argv.iter().copied())).unwrap();
        Settings::from_args(args, Path::new("/work"))
    }

    #[test]
    fn defaults() {
        let settings = settings(&["ws://a", "wss://b"]);
        assert_eq!(settings.urls, vec!["ws://a", "wss://b"]);
        assert_eq!(settings.command_file, PathBuf::from("/work/command"));
        assert_eq!(settings.history_file, PathBuf::from("/work/history"));
        assert_eq!(settings.reconnect, None);
        assert!(!settings.debug);
    }

    #[test]
    fn explicit_file_names() {
        let settings = settings(&["--cmd", "mine.yaml", "--history", "mine.hist", "ws://a"]);
        assert_eq!(settings.command_file, PathBuf::from("/work/mine.yaml"));
        assert_eq!(settings.history_file, PathBuf::from("/work/mine.hist"));
    }

    #[test]
    fn project_wins_over_file_names() {
        let settings = settings(&["--cmd", "ignored", "--prj", "demo", "ws://a"]);
        assert_eq!(settings.command_file, PathBuf::from("/work/demo-command"));
        assert_eq!(settings.history_file, PathBuf::from("/work/demo-history"));
    }

    #[test]
    fn reconnect_delay_and_no_urls() {
        let settings = settings(&["--reconnect", "1500", "--debug"]);
        assert!(settings.urls.is_empty());
        assert_eq!(settings.reconnect, Some(Duration::from_millis(1500)));
        assert!(settings.debug);
    }
}
