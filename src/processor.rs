// The console session: parses submitted lines, runs the reserved verbs,
// sends payloads, renders connection events and drives the exit flow.
use std::io::{self, Write};
use std::time::Duration;

use crossterm::event::KeyEvent;
use tracing::{debug, info, warn};

use crate::commands::{CommandStore, SetOutcome};
use crate::completion::{self, Completion};
use crate::config::Settings;
use crate::connection::{Connection, ConnectionEvent, ConnectionObserver};
use crate::editor::EditAction;
use crate::files::Snapshot;
use crate::history::{History, MAX_HISTORY, SHOW_HISTORY};
use crate::registry::ConnectionRegistry;
use crate::render::Renderer;

pub const RESERVED: [&str; 12] = [
    "help", "history", "cmd", "get", "set", "del", "clear", "exit", "exit!", "url", "ll", "ls",
];

const USAGE: &str = "\
usage: wscmd [--cmd FILE] [--history FILE] [--prj NAME] [--reconnect MILLIS] URL...

  cmd                      list saved commands (also: cmd list)
  cmd get PATTERN...       show matching commands and paste them as a cmd line
  cmd set NAME=PAYLOAD...  save commands (also: cmd set NAME PAYLOAD)
  cmd del PATTERN...       delete matching commands after confirmation
  cmd load | cmd save      reload from or write to the command file
  cmd TOKEN...             send each saved command, or the token itself
  get | set | del ...      same as cmd get | set | del
  NAME...                  send saved commands by name
  url | ll | ls            list connections with their online state
  history [N | all]        show the last N (default 20) or every input line
  history del PATTERN...   delete matching history lines after confirmation
  history load | save      reload from or write to the history file
  clear                    clear the screen
  exit                     save commands and history, then quit
  exit!                    quit without saving
  help                     this text

  PATTERN: '*' matches any run of characters, everything else is literal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// What the next submitted line answers.
enum Pending {
    DeleteCommands(Vec<String>),
    DeleteHistory(Vec<String>),
    Overwrite,
}

pub fn banner() -> String {
    format!("wscmd {} - websocket command console", env!("CARGO_PKG_VERSION"))
}

/// Splits on whitespace outside quotes. Quote characters stay in the token.
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                current.push(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Collects connection callbacks as console lines.
struct Notices {
    reconnect: Option<Duration>,
    lines: Vec<String>,
}

impl Notices {
    fn new(reconnect: Option<Duration>) -> Self {
        Self { reconnect, lines: Vec::new() }
    }
}

impl ConnectionObserver for Notices {
    fn on_open(&mut self, conn: &Connection) {
        self.lines.push(format!("< [{}] open {}", conn.label(), conn.url()));
    }

    fn on_close(&mut self, conn: &Connection, code: Option<u16>, was_open: bool) -> Option<Duration> {
        info!(id = %conn.label(), ?code, was_open, "connection closed");
        match self.reconnect {
            Some(delay) => self.lines.push(format!(
                "< [{}] close {} (reconnect in {}ms, attempt {})",
                conn.label(),
                conn.url(),
                delay.as_millis(),
                conn.reconnect_count() + 1
            )),
            None => self.lines.push(format!("< [{}] close {}", conn.label(), conn.url())),
        }
        self.reconnect
    }

    fn on_message(&mut self, conn: &Connection, text: &str) {
        self.lines.push(format!("< [{}] {text}", conn.label()));
    }

    fn on_error(&mut self, conn: &Connection, error: &str) {
        warn!(id = %conn.label(), error, "connection error");
        self.lines.push(format!("< [{}] error {} '{error}'", conn.label(), conn.url()));
    }

    fn on_ping(&mut self, conn: &Connection) {
        self.lines.push(format!("< [{}] ping", conn.label()));
    }

    fn on_pong(&mut self, conn: &Connection) {
        self.lines.push(format!("< [{}] pong", conn.label()));
    }
}

/// Everything one console run owns.
pub struct Session<W: Write> {
    settings: Settings,
    commands: CommandStore,
    history: History,
    registry: ConnectionRegistry,
    renderer: Renderer<W>,
    snapshot: Snapshot,
    /// The command document could not be parsed at startup.
    load_failed: bool,
    pending: Option<Pending>,
}

impl<W: Write> Session<W> {
    /// Prints the banner, loads both stores and lists the connections.
    pub fn open(settings: Settings, registry: ConnectionRegistry, out: W) -> io::Result<Self> {
        let mut renderer = Renderer::new(out);
        renderer.print(&banner())?;
        renderer.print(&format!("  % cmd={}", settings.command_file.display()))?;
        renderer.print(&format!("  % history={}", settings.history_file.display()))?;
        renderer.print("")?;

        let snapshot = Snapshot::capture(&settings.command_file, &settings.history_file);
        let mut load_failed = false;
        let commands = match CommandStore::load(settings.command_file.clone()) {
            Ok(commands) => commands,
            Err(err) => {
                warn!(error = %err, "command document not loaded");
                renderer.print(&format!("  ! {err}"))?;
                load_failed = true;
                CommandStore::new(settings.command_file.clone())
            }
        };
        let history = match History::load(settings.history_file.clone(), MAX_HISTORY) {
            Ok(history) => history,
            Err(err) => {
                warn!(error = %err, "history not loaded");
                renderer.print(&format!("  ! {err}"))?;
                History::new(settings.history_file.clone(), MAX_HISTORY)
            }
        };

        let mut session = Self {
            settings,
            commands,
            history,
            registry,
            renderer,
            snapshot,
            load_failed,
            pending: None,
        };
        if !session.registry.is_empty() {
            session.show_urls(false)?;
        }
        Ok(session)
    }

    pub fn has_connections(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Startup without any URL: usage, then leave.
    pub fn leave_without_connections(&mut self) -> io::Result<()> {
        self.renderer.print(USAGE)?;
        self.renderer.finish("Goodbye (No Connections)")
    }

    /// Takes over the input line and starts every connection.
    pub fn start(&mut self) -> io::Result<Flow> {
        self.renderer.set_recall(self.history.entries());
        self.renderer.go_live()?;
        let mut notices = Notices::new(self.settings.reconnect);
        let started = self.registry.connect_all(&mut notices);
        info!(started, total = self.registry.len(), "connections started");
        self.print_notices(notices)?;
        self.check_offline()
    }

    /// Follows a terminal resize; the prompt is laid out for the new width.
    pub fn resize(&mut self, columns: u16) -> io::Result<()> {
        self.renderer.set_width(columns);
        self.renderer.redraw()
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> io::Result<Flow> {
        match self.renderer.editor_mut().handle_key(key) {
            EditAction::None => Ok(Flow::Continue),
            EditAction::Redraw | EditAction::Cleared => {
                self.renderer.redraw()?;
                Ok(Flow::Continue)
            }
            EditAction::Submit(line) => self.submit(&line),
            EditAction::Complete => {
                self.complete()?;
                Ok(Flow::Continue)
            }
            EditAction::Exit => self.interrupt(),
        }
    }

    /// Ctrl-C or Ctrl-D: exit like `exit`; while the overwrite question is
    /// open it means "exit without saving".
    fn interrupt(&mut self) -> io::Result<Flow> {
        self.renderer.commit("")?;
        self.renderer.end_question();
        match self.pending.take() {
            Some(Pending::Overwrite) => self.farewell(false),
            _ => self.request_exit(true),
        }
    }

    /// Input ended: save unless the files changed underneath us.
    pub fn end_of_input(&mut self) -> io::Result<Flow> {
        self.pending = None;
        if self.load_failed || self.snapshot.changed_externally() {
            return self.farewell(false);
        }
        self.save_and_exit()
    }

    pub fn submit(&mut self, line: &str) -> io::Result<Flow> {
        self.renderer.commit(line)?;
        if let Some(pending) = self.pending.take() {
            self.renderer.end_question();
            let flow = self.answer(pending, line.trim())?;
            if flow == Flow::Continue {
                self.renderer.redraw()?;
            }
            return Ok(flow);
        }

        let line = line.trim();
        if self.history.record(line) {
            self.renderer.set_recall(self.history.entries());
        }
        let flow = self.dispatch(line)?;
        if flow == Flow::Continue {
            self.renderer.redraw()?;
        }
        Ok(flow)
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> io::Result<Flow> {
        let mut notices = Notices::new(self.settings.reconnect);
        self.registry.dispatch(event, &mut notices);
        self.print_notices(notices)?;
        self.check_offline()
    }

    fn print_notices(&mut self, notices: Notices) -> io::Result<()> {
        for line in &notices.lines {
            self.renderer.print(line)?;
        }
        Ok(())
    }

    /// Nothing open and nothing connecting: leave through the saving path.
    fn check_offline(&mut self) -> io::Result<Flow> {
        if !self.registry.tally().is_offline() || matches!(self.pending, Some(Pending::Overwrite)) {
            return Ok(Flow::Continue);
        }
        info!("all connections offline");
        if self.pending.take().is_some() {
            self.renderer.end_question();
            self.renderer.commit("")?;
        }
        self.request_exit(true)
    }

    fn dispatch(&mut self, line: &str) -> io::Result<Flow> {
        let tokens = tokenize(line);
        let Some((verb, args)) = tokens.split_first() else {
            return Ok(Flow::Continue);
        };
        debug!(verb = %verb, args = args.len(), "dispatch");

        match verb.as_str() {
            "cmd" => self.on_cmd(args)?,
            "get" | "set" | "del" => self.on_cmd(&tokens)?,
            "url" | "ll" | "ls" => self.show_urls(true)?,
            "history" => self.on_history(args)?,
            "clear" => self.on_clear()?,
            "help" => self.renderer.print(USAGE)?,
            "exit" => return self.request_exit(true),
            "exit!" => return self.request_exit(false),
            _ => self.send_named(&tokens)?,
        }
        Ok(Flow::Continue)
    }

    fn on_cmd(&mut self, args: &[String]) -> io::Result<()> {
        let Some((sub, rest)) = args.split_first() else {
            return self.list_commands();
        };
        match sub.as_str() {
            "list" => self.list_commands(),
            "get" => self.cmd_get(rest),
            "set" => self.cmd_set(rest),
            "del" => self.cmd_del(rest),
            "load" => self.cmd_load(),
            "save" => self.cmd_save(),
            _ => self.send_literal(args),
        }
    }

    fn list_commands(&mut self) -> io::Result<()> {
        if self.commands.is_empty() {
            return self.renderer.print("  0 items");
        }
        let listing = format!("{}\n  {} items", self.commands.dump(), self.commands.len());
        self.renderer.print(&listing)
    }

    fn cmd_get(&mut self, patterns: &[String]) -> io::Result<()> {
        let report = self.commands.get(patterns);
        let mut lines: Vec<String> = report
            .matches
            .iter()
            .map(|m| {
                if m.pasted || m.payload.trim().is_empty() {
                    format!("get {}: {}", m.name, m.payload)
                } else {
                    format!("get {}: {} (not pasted)", m.name, m.payload)
                }
            })
            .collect();
        lines.push(format!("  {} items", report.pasted()));
        self.renderer.print(&lines.join("\n"))?;

        if let Some(line) = report.line {
            self.renderer.editor_mut().set_line(&line);
        }
        Ok(())
    }

    fn cmd_set(&mut self, tokens: &[String]) -> io::Result<()> {
        if tokens.is_empty() {
            return self.renderer.print("  nothing to set");
        }
        let mut lines = Vec::new();
        let mut stored = false;
        for outcome in self.commands.set(tokens) {
            match outcome {
                SetOutcome::Stored { key, value } => {
                    stored = true;
                    lines.push(format!("set {key}: {value}"));
                }
                SetOutcome::Skipped { key } => lines.push(format!("set {key}: (empty, skipped)")),
            }
        }
        if stored {
            lines.push(format!("  {} items", self.commands.len()));
        }
        self.renderer.print(&lines.join("\n"))
    }

    fn cmd_del(&mut self, patterns: &[String]) -> io::Result<()> {
        let matches = self.commands.matching(patterns);
        if matches.is_empty() {
            return self.renderer.print("  0 items matched");
        }
        let listing: Vec<String> = matches.iter().map(|(name, payload)| format!("del {name}: {payload}")).collect();
        self.renderer.print(&listing.join("\n"))?;

        let question = format!("  delete {} items? [y/N] ", matches.len());
        self.pending = Some(Pending::DeleteCommands(matches.into_iter().map(|(name, _)| name).collect()));
        self.renderer.ask(&question)
    }

    fn cmd_load(&mut self) -> io::Result<()> {
        match self.commands.reload() {
            Ok(count) => {
                self.load_failed = false;
                self.snapshot.refresh_command();
                self.renderer.print(&format!(
                    "  {count} items (loaded {})",
                    self.commands.path().display()
                ))
            }
            Err(err) => {
                warn!(error = %err, "reloading commands failed");
                self.renderer.print(&format!("  ! {err}"))
            }
        }
    }

    fn cmd_save(&mut self) -> io::Result<()> {
        match self.commands.save() {
            Ok(true) => {
                self.load_failed = false;
                self.snapshot.refresh_command();
                self.renderer.print(&format!(
                    "  {} items (saved {})",
                    self.commands.len(),
                    self.commands.path().display()
                ))
            }
            Ok(false) => self.renderer.print("  0 items, nothing saved"),
            Err(err) => {
                warn!(error = %err, "saving commands failed");
                self.renderer.print(&format!("  ! {err}"))
            }
        }
    }

    fn on_history(&mut self, args: &[String]) -> io::Result<()> {
        let Some((sub, rest)) = args.split_first() else {
            return self.show_history(Some(SHOW_HISTORY));
        };
        match sub.as_str() {
            "all" => self.show_history(None),
            "del" => self.history_del(rest),
            "load" => match self.history.reload() {
                Ok(count) => {
                    self.snapshot.refresh_history();
                    self.renderer.set_recall(self.history.entries());
                    let path = self.history.path().display().to_string();
                    self.renderer.print(&format!("  {count} items (loaded {path})"))
                }
                Err(err) => self.renderer.print(&format!("  ! {err}")),
            },
            "save" => match self.history.save() {
                Ok(saved) => {
                    if saved {
                        self.snapshot.refresh_history();
                    }
                    let path = self.history.path().display().to_string();
                    self.renderer.print(&format!("  {} items (saved {path})", self.history.len()))
                }
                Err(err) => self.renderer.print(&format!("  ! {err}")),
            },
            count => match count.parse::<usize>() {
                Ok(count) if count > 0 => self.show_history(Some(count)),
                _ => self.renderer.print(&format!("? history {count}")),
            },
        }
    }

    fn show_history(&mut self, count: Option<usize>) -> io::Result<()> {
        let window = self.history.window(count);
        let mut lines: Vec<String> = window.iter().map(|line| line.to_string()).collect();
        match count {
            Some(_) => lines.push(format!(
                "  {} items (total {} items)",
                window.len(),
                self.history.len()
            )),
            None => lines.push(format!("  {} items", self.history.len())),
        }
        self.renderer.print(&lines.join("\n"))
    }

    fn history_del(&mut self, patterns: &[String]) -> io::Result<()> {
        let matches: Vec<String> = self.history.matching(patterns).into_iter().map(str::to_string).collect();
        if matches.is_empty() {
            return self.renderer.print("  0 items matched");
        }
        self.renderer.print(&matches.join("\n"))?;
        self.pending = Some(Pending::DeleteHistory(patterns.to_vec()));
        self.renderer.ask(&format!("  delete {} items? [y/N] ", matches.len()))
    }

    fn answer(&mut self, pending: Pending, answer: &str) -> io::Result<Flow> {
        let yes = answer.eq_ignore_ascii_case("y");
        match pending {
            Pending::DeleteCommands(names) => {
                if yes {
                    let removed = self.commands.remove_all(&names);
                    info!(removed, "commands deleted");
                    self.renderer.print(&format!(
                        "  {} items (deleted {removed} items)",
                        self.commands.len()
                    ))?;
                } else {
                    self.renderer.print("  nothing deleted")?;
                }
                Ok(Flow::Continue)
            }
            Pending::DeleteHistory(patterns) => {
                if yes {
                    let removed = self.history.remove_matching(&patterns);
                    info!(removed, "history entries deleted");
                    self.renderer.set_recall(self.history.entries());
                    self.renderer.print(&format!(
                        "  {} items (deleted {removed} items [{}])",
                        self.history.len(),
                        patterns.join(", ")
                    ))?;
                } else {
                    self.renderer.print("  nothing deleted")?;
                }
                Ok(Flow::Continue)
            }
            Pending::Overwrite => match answer.to_ascii_lowercase().as_str() {
                "y" => self.save_and_exit(),
                "n" => self.farewell(false),
                _ => {
                    self.renderer.print("  exit cancelled")?;
                    Ok(Flow::Continue)
                }
            },
        }
    }

    fn show_urls(&mut self, with_state: bool) -> io::Result<()> {
        let mut lines: Vec<String> = self
            .registry
            .iter()
            .map(|conn| {
                let marker = match (with_state, conn.is_online()) {
                    (false, _) => '*',
                    (true, true) => '+',
                    (true, false) => '-',
                };
                format!("{marker} [{}] {}", conn.label(), conn.url())
            })
            .collect();
        if with_state {
            let online = self.registry.online();
            lines.push(format!(
                "  {} items (online[+]: {online}, offline[-]: {})",
                self.registry.len(),
                self.registry.len() - online
            ));
        }
        self.renderer.print(&lines.join("\n"))
    }

    fn on_clear(&mut self) -> io::Result<()> {
        self.renderer.clear_screen()?;
        self.renderer.print(&format!("{}\n", banner()))?;
        self.show_urls(true)
    }

    /// Bare input: every token must name a saved command.
    fn send_named(&mut self, tokens: &[String]) -> io::Result<()> {
        for token in tokens {
            match self.commands.resolve(token).map(str::to_string) {
                Some(payload) => self.send(&payload)?,
                None => self.unknown(token)?,
            }
        }
        Ok(())
    }

    /// `cmd TOKEN...`: saved commands by name, anything else as typed.
    fn send_literal(&mut self, tokens: &[String]) -> io::Result<()> {
        for token in tokens {
            let payload = self.commands.payload_for(token).to_string();
            if payload.is_empty() {
                continue;
            }
            self.send(&payload)?;
        }
        Ok(())
    }

    fn send(&mut self, payload: &str) -> io::Result<()> {
        self.renderer.print(&format!("> {payload}"))?;
        if self.registry.broadcast(payload) == 0 {
            self.renderer.print("  not sent (no open connections)")?;
        }
        Ok(())
    }

    fn unknown(&mut self, token: &str) -> io::Result<()> {
        let message = match completion::suggest(token, self.vocabulary()) {
            Some(name) => format!("? {token}\n  did you mean '{name}'?"),
            None => format!("? {token}"),
        };
        self.renderer.print(&message)
    }

    /// Reserved words and saved command names.
    fn vocabulary(&self) -> Vec<&str> {
        let mut words: Vec<&str> = RESERVED.to_vec();
        words.extend(self.commands.names());
        words
    }

    fn complete(&mut self) -> io::Result<()> {
        let line = self.renderer.editor().line();
        match completion::complete(&line, self.vocabulary()) {
            Completion::Line(line) => self.renderer.paste(&line),
            Completion::Candidates(candidates)
                if !candidates.is_empty() && self.renderer.editor().tab_streak() > 1 =>
            {
                self.renderer.print(&candidates.join("  "))
            }
            Completion::Candidates(_) => Ok(()),
        }
    }

    /// `exit` asks before overwriting files changed since load; `exit!`
    /// leaves without writing anything.
    pub fn request_exit(&mut self, save: bool) -> io::Result<Flow> {
        if !save {
            return self.farewell(false);
        }
        if self.load_failed || self.snapshot.changed_externally() {
            self.renderer
                .print("  command or history file changed since it was loaded")?;
            self.pending = Some(Pending::Overwrite);
            self.renderer.ask("  overwrite? [y]es / [n]o, exit without saving / [c]ancel ")?;
            return Ok(Flow::Continue);
        }
        self.save_and_exit()
    }

    fn save_and_exit(&mut self) -> io::Result<Flow> {
        let mut saved = true;
        if let Err(err) = self.commands.save() {
            warn!(error = %err, "saving commands failed");
            self.renderer.print(&format!("  ! {err}"))?;
            saved = false;
        }
        if let Err(err) = self.history.save() {
            warn!(error = %err, "saving history failed");
            self.renderer.print(&format!("  ! {err}"))?;
            saved = false;
        }
        self.farewell(saved)
    }

    fn farewell(&mut self, saved: bool) -> io::Result<Flow> {
        let online = self.registry.online() > 0;
        let message = match (saved, online) {
            (true, true) => "Goodbye",
            (true, false) => "Goodbye (No Connections)",
            (false, true) => "Goodbye (No Saving)",
            (false, false) => "Goodbye (No Saving, No Connections)",
        };
        info!(saved, online, "exiting");
        self.registry.close_all();
        self.renderer.finish(message)?;
        Ok(Flow::Exit)
    }
}
