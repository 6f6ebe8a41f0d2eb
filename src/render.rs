// Owns the single line-editing surface. Every print clears the rows the
// prompt occupies, writes the message, then restores the prompt, the
// in-progress input and the cursor position exactly as they were.
use std::io::{self, Write};

use crossterm::cursor::{MoveTo, MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use unicode_width::UnicodeWidthStr;

use crate::editor::LineEditor;

pub const PROMPT: &str = "$ ";

const DEFAULT_WIDTH: u16 = 80;

pub struct Renderer<W: Write> {
    out: W,
    editor: LineEditor,
    question: Option<String>,
    /// False until the console takes over the terminal and after the final
    /// message; plain lines are written then.
    live: bool,
    width: u16,
    /// Row of the cursor inside the drawn prompt, counted from its first row.
    cursor_row: u16,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            editor: LineEditor::new(),
            question: None,
            live: false,
            width: DEFAULT_WIDTH,
            cursor_row: 0,
        }
    }

    /// Terminal width in columns; input wider than this wraps onto more rows.
    pub fn set_width(&mut self, columns: u16) {
        self.width = columns.max(1);
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut LineEditor {
        &mut self.editor
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn go_live(&mut self) -> io::Result<()> {
        self.live = true;
        self.redraw()
    }

    pub fn print(&mut self, message: &str) -> io::Result<()> {
        if self.live {
            self.clear_prompt()?;
            self.write_lines(message)?;
            self.draw_prompt()?;
        } else {
            self.write_lines(message)?;
        }
        self.out.flush()
    }

    pub fn redraw(&mut self) -> io::Result<()> {
        if !self.live {
            return Ok(());
        }
        self.clear_prompt()?;
        self.draw_prompt()?;
        self.out.flush()
    }

    /// Leaves a submitted line on screen as `<prompt><line>`. The prompt is
    /// drawn again by the next print or redraw.
    pub fn commit(&mut self, line: &str) -> io::Result<()> {
        if !self.live {
            return Ok(());
        }
        let prompt = self.prompt().to_string();
        self.clear_prompt()?;
        queue!(
            self.out,
            Print(prompt),
            Print(line),
            Print("\r\n")
        )?;
        self.out.flush()
    }

    /// Swaps the prompt for a one-line question; the next submitted line is
    /// the answer.
    pub fn ask(&mut self, question: &str) -> io::Result<()> {
        self.question = Some(question.to_string());
        self.editor.clear();
        self.redraw()
    }

    pub fn end_question(&mut self) {
        self.question = None;
    }

    pub fn is_asking(&self) -> bool {
        self.question.is_some()
    }

    /// Offers `line` as the input buffer without submitting it.
    pub fn paste(&mut self, line: &str) -> io::Result<()> {
        self.editor.set_line(line);
        self.redraw()
    }

    pub fn set_recall(&mut self, entries: &[String]) {
        self.editor.set_recall(entries);
    }

    pub fn clear_screen(&mut self) -> io::Result<()> {
        queue!(self.out, MoveTo(0, 0), Clear(ClearType::FromCursorDown))?;
        self.cursor_row = 0;
        self.out.flush()
    }

    /// Prints the last message; nothing is redrawn afterwards.
    pub fn finish(&mut self, message: &str) -> io::Result<()> {
        if self.live {
            self.clear_prompt()?;
            self.live = false;
        }
        self.question = None;
        self.write_lines(message)?;
        self.out.flush()
    }

    #[cfg(test)]
    pub(crate) fn out_mut(&mut self) -> &mut W {
        &mut self.out
    }

    fn prompt(&self) -> &str {
        self.question.as_deref().unwrap_or(PROMPT)
    }

    fn write_lines(&mut self, message: &str) -> io::Result<()> {
        for line in message.split('\n') {
            queue!(self.out, Print(line), Print("\r\n"))?;
        }
        Ok(())
    }

    /// Moves to the first row of the drawn prompt and erases it and
    /// everything below.
    fn clear_prompt(&mut self) -> io::Result<()> {
        if self.cursor_row > 0 {
            queue!(self.out, MoveUp(self.cursor_row))?;
        }
        self.cursor_row = 0;
        queue!(self.out, MoveToColumn(0), Clear(ClearType::FromCursorDown))
    }

    fn draw_prompt(&mut self) -> io::Result<()> {
        let prompt = self.prompt().to_string();
        let line = self.editor.line().to_string();
        let width = usize::from(self.width);
        let total = prompt.width() + line.width();
        let position = prompt.width() + self.editor.before_cursor().width();
        queue!(self.out, Print(prompt), Print(line))?;

        // A row filled to the last column leaves the cursor pending there;
        // continue on a fresh row.
        if total > 0 && total % width == 0 {
            queue!(self.out, Print("\r\n"))?;
        }
        let end_row = total / width;
        let row = position / width;
        let up = to_u16(end_row - row);
        if up > 0 {
            queue!(self.out, MoveUp(up))?;
        }
        self.cursor_row = to_u16(row);
        queue!(self.out, MoveToColumn(to_u16(position % width)))
    }
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}


#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::testing::plain;
    use super::*;

    fn typed(renderer: &mut Renderer<Vec<u8>>, text: &str) {
        for c in text.chars() {
            renderer
                .editor_mut()
                .handle_key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE));
        }
    }

    fn take(renderer: &mut Renderer<Vec<u8>>) -> String {
        String::from_utf8(std::mem::take(&mut renderer.out)).unwrap()
    }

    #[test]
    fn print_clears_line_then_restores_input_and_cursor() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        typed(&mut renderer, "abc");
        renderer
            .editor_mut()
            .handle_key(KeyEvent::new(KeyCode::Left, KeyModifiers::NONE));
        take(&mut renderer);

        renderer.print("< [url0] hi").unwrap();

        // clear line, message, prompt + buffer, cursor to column 2 + 2
        assert_eq!(
            take(&mut renderer),
            "\x1b[1G\x1b[J< [url0] hi\r\n$ abc\x1b[5G"
        );
        assert_eq!(renderer.editor().line(), "abc");
        assert_eq!(renderer.editor().cursor(), 2);
    }

    #[test]
    fn cursor_column_accounts_for_wide_characters() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        typed(&mut renderer, "한글");
        take(&mut renderer);

        renderer.redraw().unwrap();
        assert!(take(&mut renderer).ends_with("$ 한글\x1b[7G"));
    }

    #[test]
    fn multi_line_messages_keep_the_prompt_last() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        take(&mut renderer);

        renderer.print("one\ntwo").unwrap();
        assert_eq!(plain(&take(&mut renderer).into_bytes()), "one\ntwo\n$ ");
    }

    #[test]
    fn before_going_live_lines_are_plain() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.print("banner").unwrap();
        renderer.redraw().unwrap();
        assert_eq!(take(&mut renderer), "banner\r\n");
    }

    #[test]
    fn questions_replace_the_prompt_until_answered() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        typed(&mut renderer, "leftover");
        renderer.ask("  delete 2 items? [y/N] ").unwrap();
        assert!(renderer.is_asking());
        assert!(renderer.editor().is_empty());
        assert!(plain(&take(&mut renderer).into_bytes()).ends_with("  delete 2 items? [y/N] "));

        renderer.commit("y").unwrap();
        renderer.end_question();
        renderer.redraw().unwrap();
        assert_eq!(
            plain(&take(&mut renderer).into_bytes()),
            "  delete 2 items? [y/N] y\n$ "
        );
    }

    #[test]
    fn paste_fills_the_buffer_without_submitting() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        take(&mut renderer);

        renderer.paste("cmd 'a' 'b'").unwrap();
        assert_eq!(renderer.editor().line(), "cmd 'a' 'b'");
        assert_eq!(renderer.editor().cursor(), 11);
        assert!(plain(&take(&mut renderer).into_bytes()).ends_with("$ cmd 'a' 'b'"));
    }

    #[test]
    fn finish_stops_redrawing() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.go_live().unwrap();
        take(&mut renderer);

        renderer.finish("Goodbye").unwrap();
        assert!(!renderer.is_live());
        assert_eq!(plain(&take(&mut renderer).into_bytes()), "Goodbye\n");
        renderer.redraw().unwrap();
        assert!(take(&mut renderer).is_empty());
    }

    #[test]
    fn wrapped_input_is_cleared_from_its_first_row() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.set_width(10);
        renderer.go_live().unwrap();
        typed(&mut renderer, "abcdefghijklmno");
        renderer.redraw().unwrap();
        // 17 cells over two rows; the cursor ends on the second one
        assert!(take(&mut renderer).ends_with("$ abcdefghijklmno\x1b[8G"));

        renderer.print("< [url0] hi").unwrap();
        assert_eq!(
            take(&mut renderer),
            "\x1b[1A\x1b[1G\x1b[J< [url0] hi\r\n$ abcdefghijklmno\x1b[8G"
        );
    }

    #[test]
    fn cursor_is_placed_by_row_and_column_on_narrow_terminals() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.set_width(10);
        renderer.go_live().unwrap();
        typed(&mut renderer, "abcdefghijklmno");
        renderer
            .editor_mut()
            .handle_key(KeyEvent::new(KeyCode::Home, KeyModifiers::NONE));
        take(&mut renderer);

        renderer.redraw().unwrap();
        assert!(take(&mut renderer).ends_with("$ abcdefghijklmno\x1b[1A\x1b[3G"));

        // already on the first row, nothing to climb
        renderer.print("hi").unwrap();
        assert!(take(&mut renderer).starts_with("\x1b[1G\x1b[Jhi\r\n"));
    }

    #[test]
    fn input_filling_the_last_column_starts_a_fresh_row() {
        let mut renderer = Renderer::new(Vec::new());
        renderer.set_width(10);
        renderer.go_live().unwrap();
        typed(&mut renderer, "abcdefgh");
        take(&mut renderer);

        renderer.redraw().unwrap();
        assert!(take(&mut renderer).ends_with("$ abcdefgh\r\n\x1b[1G"));
        renderer.finish("Goodbye").unwrap();
        assert_eq!(take(&mut renderer), "\x1b[1A\x1b[1G\x1b[JGoodbye\r\n");
    }
}
