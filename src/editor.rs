// The in-progress input line: buffer, cursor and arrow-key recall
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    None,
    Redraw,
    Submit(String),
    Complete,
    /// Esc wiped a non-empty line.
    Cleared,
    Exit,
}

#[derive(Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    /// Char index into `buffer`.
    cursor: usize,
    /// Most recent first.
    recall: Vec<String>,
    recall_index: Option<usize>,
    draft: Vec<char>,
    tab_streak: u8,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn before_cursor(&self) -> String {
        self.buffer[..self.cursor].iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Replaces the buffer and puts the cursor at its end.
    pub fn set_line(&mut self, line: &str) {
        self.buffer = line.chars().collect();
        self.cursor = self.buffer.len();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.recall_index = None;
    }

    /// Rebuilds the recall list, most recent entry first.
    pub fn set_recall(&mut self, entries: &[String]) {
        self.recall = entries.to_vec();
        self.recall_index = None;
    }

    /// Consecutive Tab presses so far, including the current one.
    pub fn tab_streak(&self) -> u8 {
        self.tab_streak
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> EditAction {
        if key.code == KeyCode::Tab {
            self.tab_streak = self.tab_streak.saturating_add(1);
            return EditAction::Complete;
        }
        self.tab_streak = 0;

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => EditAction::Exit,
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    EditAction::Exit
                } else {
                    self.delete_forward()
                }
            }
            KeyCode::Char('a') if ctrl => self.move_to(0),
            KeyCode::Char('e') if ctrl => self.move_to(self.buffer.len()),
            KeyCode::Char('u') if ctrl => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                EditAction::Redraw
            }
            KeyCode::Char('k') if ctrl => {
                self.buffer.truncate(self.cursor);
                EditAction::Redraw
            }
            KeyCode::Char(_) if ctrl => EditAction::None,
            KeyCode::Char(c) => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
                EditAction::Redraw
            }
            KeyCode::Enter => {
                let line = self.line();
                self.clear();
                self.draft.clear();
                EditAction::Submit(line)
            }
            KeyCode::Esc => {
                if self.buffer.is_empty() {
                    EditAction::None
                } else {
                    self.clear();
                    EditAction::Cleared
                }
            }
            KeyCode::Backspace => {
                if self.cursor == 0 {
                    return EditAction::None;
                }
                self.cursor -= 1;
                self.buffer.remove(self.cursor);
                EditAction::Redraw
            }
            KeyCode::Delete => self.delete_forward(),
            KeyCode::Left => self.move_to(self.cursor.saturating_sub(1)),
            KeyCode::Right => self.move_to((self.cursor + 1).min(self.buffer.len())),
            KeyCode::Home => self.move_to(0),
            KeyCode::End => self.move_to(self.buffer.len()),
            KeyCode::Up => self.recall_older(),
            KeyCode::Down => self.recall_newer(),
            _ => EditAction::None,
        }
    }

    fn move_to(&mut self, cursor: usize) -> EditAction {
        if cursor == self.cursor {
            return EditAction::None;
        }
        self.cursor = cursor;
        EditAction::Redraw
    }

    fn delete_forward(&mut self) -> EditAction {
        if self.cursor >= self.buffer.len() {
            return EditAction::None;
        }
        self.buffer.remove(self.cursor);
        EditAction::Redraw
    }

    fn recall_older(&mut self) -> EditAction {
        let next = match self.recall_index {
            None if !self.recall.is_empty() => {
                self.draft = self.buffer.clone();
                0
            }
            Some(i) if i + 1 < self.recall.len() => i + 1,
            _ => return EditAction::None,
        };
        self.recall_index = Some(next);
        let entry = self.recall[next].clone();
        self.set_line(&entry);
        EditAction::Redraw
    }

    fn recall_newer(&mut self) -> EditAction {
        match self.recall_index {
            None => EditAction::None,
            Some(0) => {
                self.recall_index = None;
                self.buffer = std::mem::take(&mut self.draft);
                self.cursor = self.buffer.len();
                EditAction::Redraw
            }
            Some(i) => {
                self.recall_index = Some(i - 1);
                let entry = self.recall[i - 1].clone();
                self.set_line(&entry);
                EditAction::Redraw
            }
        }
    }
}
