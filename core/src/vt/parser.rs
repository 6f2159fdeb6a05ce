//! Byte-oriented VT100/ANSI state machine. Feeds a [`Screen`] from raw PTY output.
//!
//! Recognizes C0 controls, CSI sequences (cursor motion, erase, SGR) and OSC/ESC sequences well
//! enough to drive a screen buffer; anything unrecognized is swallowed rather than surfaced as an
//! error, since a single malformed escape must never stop rendering the rest of the stream.

use super::screen::{CellFlags, Color, Screen};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Ground,
    Escape,
    Csi,
    Osc,
}

/// Drives a [`Screen`] from a byte stream, one `write` call at a time. State persists across
/// calls so a split escape sequence (e.g. the CSI introducer in one read and its parameters in
/// the next) is handled correctly.
pub struct Parser {
    state: ParserState,
    params: Vec<u16>,
    current_param: Option<u16>,
    osc_buf: Vec<u8>,
    utf8_buf: Vec<u8>,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Ground,
            params: Vec::new(),
            current_param: None,
            osc_buf: Vec::new(),
            utf8_buf: Vec::new(),
        }
    }

    /// Feed raw bytes into the parser, applying their effect to `screen`.
    pub fn feed(&mut self, screen: &mut Screen, bytes: &[u8]) {
        for &byte in bytes {
            self.feed_byte(screen, byte);
        }
    }

    fn feed_byte(&mut self, screen: &mut Screen, byte: u8) {
        match self.state {
            ParserState::Ground => self.ground(screen, byte),
            ParserState::Escape => self.escape(screen, byte),
            ParserState::Csi => self.csi(screen, byte),
            ParserState::Osc => self.osc(byte),
        }
    }

    fn ground(&mut self, screen: &mut Screen, byte: u8) {
        match byte {
            0x1b => {
                self.state = ParserState::Escape;
            }
            b'\r' => screen.carriage_return(),
            b'\n' => screen.newline(),
            0x08 => screen.backspace(),
            0x09 => screen.tab(),
            0x00..=0x06 | 0x0b..=0x1a | 0x1c..=0x1f => {
                // Other C0 controls: no visible effect.
            }
            _ => self.feed_utf8_byte(screen, byte),
        }
    }

    /// Buffers UTF-8 continuation bytes and emits a character once a full codepoint is available,
    /// replacing invalid sequences with U+FFFD rather than failing the stream.
    fn feed_utf8_byte(&mut self, screen: &mut Screen, byte: u8) {
        self.utf8_buf.push(byte);
        match std::str::from_utf8(&self.utf8_buf) {
            Ok(s) => {
                if let Some(ch) = s.chars().next() {
                    screen.put_char(ch);
                }
                self.utf8_buf.clear();
            }
            Err(e) => {
                if e.error_len().is_some() {
                    screen.put_char(char::REPLACEMENT_CHARACTER);
                    self.utf8_buf.clear();
                } else if self.utf8_buf.len() >= 4 {
                    screen.put_char(char::REPLACEMENT_CHARACTER);
                    self.utf8_buf.clear();
                }
                // else: valid prefix of a multi-byte sequence, wait for more bytes.
            }
        }
    }

    fn escape(&mut self, screen: &mut Screen, byte: u8) {
        match byte {
            b'[' => {
                self.params.clear();
                self.current_param = None;
                self.state = ParserState::Csi;
            }
            b']' => {
                self.osc_buf.clear();
                self.state = ParserState::Osc;
            }
            _ => {
                // Other ESC finals (e.g. charset selection) have no effect on our grid.
                self.state = ParserState::Ground;
            }
        }
        let _ = screen;
    }

    fn csi(&mut self, screen: &mut Screen, byte: u8) {
        match byte {
            b'0'..=b'9' => {
                let digit = (byte - b'0') as u16;
                // Saturate rather than wrap/panic: a pathologically long digit run (or garbage
                // bytes mistaken for a CSI) must never crash the parser, only cap out the param.
                let current = self.current_param.unwrap_or(0);
                self.current_param = Some(current.saturating_mul(10).saturating_add(digit));
            }
            b';' => {
                self.params.push(self.current_param.take().unwrap_or(0));
            }
            0x40..=0x7e => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.dispatch_csi(screen, byte);
                self.state = ParserState::Ground;
            }
            _ => {
                // Intermediate bytes (e.g. '?') are ignored; private-mode CSIs fall through
                // harmlessly to dispatch on their final byte.
            }
        }
    }

    fn param(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index) {
            Some(&0) | None => default,
            Some(&v) => v,
        }
    }

    fn dispatch_csi(&mut self, screen: &mut Screen, final_byte: u8) {
        match final_byte {
            b'A' => screen.move_cursor(0, -(self.param(0, 1) as i32)),
            b'B' => screen.move_cursor(0, self.param(0, 1) as i32),
            b'C' => screen.move_cursor(self.param(0, 1) as i32, 0),
            b'D' => screen.move_cursor(-(self.param(0, 1) as i32), 0),
            b'H' | b'f' => {
                let row = self.params.first().copied().unwrap_or(1).max(1) as i32 - 1;
                let col = self.params.get(1).copied().unwrap_or(1).max(1) as i32 - 1;
                screen.set_cursor(col, row);
            }
            b'J' => screen.erase_display(self.params.first().copied().unwrap_or(0)),
            b'K' => screen.erase_line(self.params.first().copied().unwrap_or(0)),
            b'm' => self.apply_sgr(screen),
            _ => {
                // Unsupported CSI final: no-op.
            }
        }
    }

    fn apply_sgr(&mut self, screen: &mut Screen) {
        if self.params.is_empty() {
            self.params.push(0);
        }
        let pen = screen.pen_mut();
        let mut i = 0;
        while i < self.params.len() {
            match self.params[i] {
                0 => {
                    pen.fg = Color::Default;
                    pen.bg = Color::Default;
                    pen.flags = CellFlags::empty();
                }
                1 => pen.flags.insert(CellFlags::BOLD),
                3 => pen.flags.insert(CellFlags::ITALIC),
                4 => pen.flags.insert(CellFlags::UNDERLINE),
                7 => pen.flags.insert(CellFlags::DIM_OR_INVERSE),
                n @ 30..=37 => pen.fg = Color::Palette((n - 30) as u8),
                n @ 40..=47 => pen.bg = Color::Palette((n - 40) as u8),
                38 => {
                    if let Some(consumed) = self.parse_extended_color(&self.params[i..]) {
                        pen.fg = consumed.0;
                        i += consumed.1;
                    }
                }
                48 => {
                    if let Some(consumed) = self.parse_extended_color(&self.params[i..]) {
                        pen.bg = consumed.0;
                        i += consumed.1;
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Parses `38;5;n` (palette) or `38;2;r;g;b` (RGB) starting at `params[0] == 38|48`.
    /// Returns the resolved color and how many extra params (beyond the leading 38/48) it consumed.
    fn parse_extended_color(&self, params: &[u16]) -> Option<(Color, usize)> {
        match params.get(1) {
            Some(5) => {
                let idx = *params.get(2)?;
                Some((Color::Palette(idx as u8), 2))
            }
            Some(2) => {
                let r = *params.get(2)? as u8;
                let g = *params.get(3)? as u8;
                let b = *params.get(4)? as u8;
                Some((Color::Rgb(r, g, b), 4))
            }
            _ => None,
        }
    }

    fn osc(&mut self, byte: u8) {
        match byte {
            0x07 => self.state = ParserState::Ground,
            0x1b => self.state = ParserState::Ground,
            _ => self.osc_buf.push(byte),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_row(screen: &Screen, row: usize) -> String {
        screen.snapshot().cells[row].iter().map(|c| c.ch).collect()
    }

    #[test]
    fn plain_text_is_written_left_to_right() {
        let mut screen = Screen::new(10, 2);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"hi");
        assert_eq!(&render_row(&screen, 0)[..2], "hi");
    }

    #[test]
    fn crlf_moves_to_start_of_next_line() {
        let mut screen = Screen::new(10, 2);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"ab\r\ncd");
        assert_eq!(&render_row(&screen, 0)[..2], "ab");
        assert_eq!(&render_row(&screen, 1)[..2], "cd");
    }

    #[test]
    fn cursor_motion_csi_sequences_move_the_cursor() {
        let mut screen = Screen::new(10, 5);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[3B\x1b[2C");
        assert_eq!(screen.cursor(), (2, 3));
        parser.feed(&mut screen, b"\x1b[1A");
        assert_eq!(screen.cursor(), (2, 2));
    }

    #[test]
    fn cursor_position_csi_is_one_indexed() {
        let mut screen = Screen::new(10, 10);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[3;4H");
        assert_eq!(screen.cursor(), (3, 2));
    }

    #[test]
    fn erase_display_csi_clears_the_whole_grid() {
        let mut screen = Screen::new(5, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"hello\x1b[2J");
        assert_eq!(render_row(&screen, 0), "     ");
    }

    #[test]
    fn sgr_basic_colors_and_bold_apply_to_following_text() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[1;31mX");
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].fg, Color::Palette(1));
        assert!(snap.cells[0][0].flags.contains(CellFlags::BOLD));
    }

    #[test]
    fn sgr_reset_clears_style_for_following_text() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[31mA\x1b[0mB");
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].fg, Color::Palette(1));
        assert_eq!(snap.cells[0][1].fg, Color::Default);
    }

    #[test]
    fn sgr_truecolor_extended_sequence_sets_rgb() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[38;2;10;20;30mX");
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].fg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn sgr_palette_extended_sequence_sets_256_color_index() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[48;5;200mX");
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].bg, Color::Palette(200));
    }

    #[test]
    fn malformed_escape_sequence_is_swallowed_not_fatal() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b[9999999999zgarbage");
        // Whatever survived the bogus CSI still renders without panicking.
        assert!(render_row(&screen, 0).len() == 10);
    }

    #[test]
    fn multibyte_utf8_split_across_feed_calls_decodes_correctly() {
        let mut screen = Screen::new(5, 1);
        let mut parser = Parser::new();
        let bytes = "€".as_bytes(); // 3-byte UTF-8 sequence
        parser.feed(&mut screen, &bytes[..1]);
        parser.feed(&mut screen, &bytes[1..]);
        assert_eq!(screen.snapshot().cells[0][0].ch, '€');
    }

    #[test]
    fn invalid_utf8_is_replaced_rather_than_dropped() {
        let mut screen = Screen::new(5, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, &[0xFF]);
        assert_eq!(screen.snapshot().cells[0][0].ch, char::REPLACEMENT_CHARACTER);
    }

    #[test]
    fn osc_sequence_is_parsed_and_ignored_without_corrupting_ground_state() {
        let mut screen = Screen::new(10, 1);
        let mut parser = Parser::new();
        parser.feed(&mut screen, b"\x1b]0;window title\x07ok");
        assert_eq!(&render_row(&screen, 0)[..2], "ok");
    }
}
