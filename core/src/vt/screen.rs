//! Virtual screen: a grid of styled cells plus a cursor, fed by [`super::parser::Parser`].

use serde::Serialize;

/// Tiny local stand-in for the `bitflags!` macro so cell flags stay a plain `Copy` bitset
/// without pulling in the `bitflags` crate for four bits.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $flag:ident = $val:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
        pub struct $name($ty);

        impl $name {
            $(pub const $flag: $name = $name($val);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn bits(&self) -> $ty {
                self.0
            }

            pub fn from_bits_truncate(bits: $ty) -> Self {
                $name(bits)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

/// Foreground/background color. `Default` means "whatever the terminal's default is" (never
/// encoded as an explicit value on the wire); `Palette` is the classic 256-color index;
/// `Rgb` is 24-bit truecolor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Color {
    Default,
    Palette(u8),
    Rgb(u8, u8, u8),
}

impl Default for Color {
    fn default() -> Self {
        Color::Default
    }
}

bitflags_like! {
    /// Cell style flags.
    pub struct CellFlags: u8 {
        const BOLD = 0b0001;
        const ITALIC = 0b0010;
        const UNDERLINE = 0b0100;
        const DIM_OR_INVERSE = 0b1000;
    }
}

/// A single grid position. `width` is 2 for the leading half of a wide (e.g. CJK) character and
/// 0 for its trailing placeholder; 1 otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub flags: CellFlags,
    pub width: u8,
}

impl Default for Cell {
    fn default() -> Self {
        Self { ch: ' ', fg: Color::Default, bg: Color::Default, flags: CellFlags::empty(), width: 1 }
    }
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        self.ch == ' ' && self.fg == Color::Default && self.bg == Color::Default && self.flags.is_empty()
    }
}

/// Current SGR pen: applied to every cell written until changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pen {
    pub fg: Color,
    pub bg: Color,
    pub flags: CellFlags,
}

const MAX_SCROLLBACK_LINES: usize = 10_000;

/// Immutable view of the screen returned by [`Screen::snapshot`]; this is what the binary
/// snapshot encoder and the JSON debug endpoints consume.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenSnapshot {
    pub cols: u32,
    pub rows: u32,
    pub viewport_y: i32,
    pub cursor_x: i32,
    pub cursor_y: i32,
    pub cells: Vec<Vec<Cell>>,
}

/// Mutable grid + cursor + scrollback, driven by the VT parser.
pub struct Screen {
    cols: usize,
    rows: usize,
    cursor_x: usize,
    cursor_y: usize,
    grid: Vec<Vec<Cell>>,
    scrollback: std::collections::VecDeque<Vec<Cell>>,
    pen: Pen,
}

impl Screen {
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cols,
            rows,
            cursor_x: 0,
            cursor_y: 0,
            grid: vec![vec![Cell::default(); cols]; rows],
            scrollback: std::collections::VecDeque::new(),
            pen: Pen::default(),
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn pen_mut(&mut self) -> &mut Pen {
        &mut self.pen
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_x, self.cursor_y)
    }

    /// Writes one character at the cursor, advancing it (wrapping to the next line if needed).
    pub fn put_char(&mut self, ch: char) {
        if self.cursor_x >= self.cols {
            self.newline();
        }
        let width = if ch.len_utf8() > 1 && unicode_width_is_wide(ch) { 2 } else { 1 };
        let cell = Cell { ch, fg: self.pen.fg, bg: self.pen.bg, flags: self.pen.flags, width: width as u8 };
        self.grid[self.cursor_y][self.cursor_x] = cell;
        self.cursor_x += 1;
        if width == 2 && self.cursor_x < self.cols {
            self.grid[self.cursor_y][self.cursor_x] = Cell { width: 0, ..Cell::default() };
            self.cursor_x += 1;
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_x = 0;
    }

    pub fn newline(&mut self) {
        self.cursor_x = 0;
        if self.cursor_y + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.cursor_y += 1;
        }
    }

    fn scroll_up(&mut self) {
        let top = self.grid.remove(0);
        self.scrollback.push_back(top);
        while self.scrollback.len() > MAX_SCROLLBACK_LINES {
            self.scrollback.pop_front();
        }
        self.grid.push(vec![Cell::default(); self.cols]);
    }

    pub fn backspace(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        }
    }

    pub fn tab(&mut self) {
        let next_stop = ((self.cursor_x / 8) + 1) * 8;
        self.cursor_x = next_stop.min(self.cols.saturating_sub(1));
    }

    pub fn move_cursor(&mut self, dx: i32, dy: i32) {
        let nx = (self.cursor_x as i32 + dx).clamp(0, self.cols as i32 - 1);
        let ny = (self.cursor_y as i32 + dy).clamp(0, self.rows as i32 - 1);
        self.cursor_x = nx as usize;
        self.cursor_y = ny as usize;
    }

    pub fn set_cursor(&mut self, x: i32, y: i32) {
        self.cursor_x = x.clamp(0, self.cols as i32 - 1) as usize;
        self.cursor_y = y.clamp(0, self.rows as i32 - 1) as usize;
    }

    /// Erase from cursor to end of line (`n=0`), start of line to cursor (`n=1`), or whole line (`n=2`).
    pub fn erase_line(&mut self, n: u16) {
        let row = &mut self.grid[self.cursor_y];
        match n {
            0 => row[self.cursor_x..].fill(Cell::default()),
            1 => row[..=self.cursor_x.min(row.len() - 1)].fill(Cell::default()),
            _ => row.fill(Cell::default()),
        }
    }

    /// Erase from cursor to end of screen (`n=0`), start of screen to cursor (`n=1`), or whole screen (`n=2`).
    pub fn erase_display(&mut self, n: u16) {
        match n {
            0 => {
                self.erase_line(0);
                for row in self.grid.iter_mut().skip(self.cursor_y + 1) {
                    row.fill(Cell::default());
                }
            }
            1 => {
                self.erase_line(1);
                for row in self.grid.iter_mut().take(self.cursor_y) {
                    row.fill(Cell::default());
                }
            }
            _ => {
                for row in self.grid.iter_mut() {
                    row.fill(Cell::default());
                }
            }
        }
    }

    /// Resize the grid, preserving the overlap region and clamping the cursor. Idempotent when
    /// dimensions are unchanged.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        if cols == self.cols && rows == self.rows {
            return;
        }
        let mut new_grid = vec![vec![Cell::default(); cols]; rows];
        for (y, row) in self.grid.iter().enumerate().take(rows) {
            for (x, cell) in row.iter().enumerate().take(cols) {
                new_grid[y][x] = *cell;
            }
        }
        self.grid = new_grid;
        self.cols = cols;
        self.rows = rows;
        self.cursor_x = self.cursor_x.min(cols - 1);
        self.cursor_y = self.cursor_y.min(rows - 1);
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            cols: self.cols as u32,
            rows: self.rows as u32,
            viewport_y: 0,
            cursor_x: self.cursor_x as i32,
            cursor_y: self.cursor_y as i32,
            cells: self.grid.clone(),
        }
    }
}

fn unicode_width_is_wide(ch: char) -> bool {
    // Coarse East-Asian-width heuristic covering the common wide blocks; good enough for the
    // snapshot encoder, which only needs "occupies two columns or not".
    matches!(ch as u32,
        0x1100..=0x115F | 0x2E80..=0xA4CF | 0xAC00..=0xD7A3 |
        0xF900..=0xFAFF | 0xFF00..=0xFF60 | 0xFFE0..=0xFFE6 |
        0x20000..=0x3FFFD
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_screen_starts_blank_with_cursor_at_origin() {
        let screen = Screen::new(80, 24);
        assert_eq!(screen.cursor(), (0, 0));
        let snap = screen.snapshot();
        assert_eq!((snap.cols, snap.rows), (80, 24));
        assert!(snap.cells.iter().all(|row| row.iter().all(Cell::is_blank)));
    }

    #[test]
    fn one_by_one_grid_never_panics_and_clamps_cursor() {
        let mut screen = Screen::new(1, 1);
        screen.put_char('x');
        screen.put_char('y');
        screen.move_cursor(5, 5);
        assert_eq!(screen.cursor(), (0, 0));
        let snap = screen.snapshot();
        assert_eq!((snap.cols, snap.rows), (1, 1));
    }

    #[test]
    fn put_char_advances_cursor_and_wraps_at_end_of_row() {
        let mut screen = Screen::new(3, 2);
        screen.put_char('a');
        screen.put_char('b');
        screen.put_char('c');
        assert_eq!(screen.cursor(), (0, 1));
        screen.put_char('d');
        assert_eq!(screen.cursor(), (1, 1));
        let snap = screen.snapshot();
        let row0: String = snap.cells[0].iter().map(|c| c.ch).collect();
        assert_eq!(row0, "abc");
        assert_eq!(snap.cells[1][0].ch, 'd');
    }

    #[test]
    fn newline_past_last_row_scrolls_up_and_blanks_new_last_line() {
        let mut screen = Screen::new(3, 2);
        screen.put_char('a');
        screen.newline();
        screen.put_char('b');
        screen.newline();
        screen.put_char('c');
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].ch, 'b');
        assert_eq!(snap.cells[1][0].ch, 'c');
    }

    #[test]
    fn tab_stops_land_on_every_eighth_column() {
        let mut screen = Screen::new(40, 1);
        screen.tab();
        assert_eq!(screen.cursor().0, 8);
        screen.tab();
        assert_eq!(screen.cursor().0, 16);
    }

    #[test]
    fn backspace_moves_left_but_not_past_column_zero() {
        let mut screen = Screen::new(10, 1);
        screen.backspace();
        assert_eq!(screen.cursor().0, 0);
        screen.move_cursor(3, 0);
        screen.backspace();
        assert_eq!(screen.cursor().0, 2);
    }

    #[test]
    fn erase_line_variants_clear_the_expected_span() {
        let mut screen = Screen::new(5, 1);
        for ch in "abcde".chars() {
            screen.put_char(ch);
        }
        screen.set_cursor(2, 0);
        screen.erase_line(0);
        let row: String = screen.snapshot().cells[0].iter().map(|c| c.ch).collect();
        assert_eq!(row, "ab   ");
    }

    #[test]
    fn erase_display_whole_screen_clears_every_row() {
        let mut screen = Screen::new(3, 2);
        screen.put_char('a');
        screen.newline();
        screen.put_char('b');
        screen.erase_display(2);
        assert!(screen.snapshot().cells.iter().all(|row| row.iter().all(Cell::is_blank)));
    }

    #[test]
    fn resize_preserves_overlap_and_clamps_cursor() {
        let mut screen = Screen::new(120, 30);
        for ch in "hello".chars() {
            screen.put_char(ch);
        }
        screen.set_cursor(100, 25);
        screen.resize(80, 24);
        let snap = screen.snapshot();
        assert_eq!((snap.cols, snap.rows), (80, 24));
        assert!(snap.cursor_x < 80 && snap.cursor_y < 24);
        let row0: String = snap.cells[0].iter().take(5).map(|c| c.ch).collect();
        assert_eq!(row0, "hello");
    }

    #[test]
    fn resize_to_same_dimensions_is_a_no_op() {
        let mut screen = Screen::new(80, 24);
        screen.put_char('z');
        screen.resize(80, 24);
        screen.resize(80, 24);
        let snap = screen.snapshot();
        assert_eq!((snap.cols, snap.rows), (80, 24));
        assert_eq!(snap.cells[0][0].ch, 'z');
    }

    #[test]
    fn sgr_style_is_carried_on_subsequent_writes_until_reset() {
        let mut screen = Screen::new(10, 1);
        screen.pen_mut().fg = Color::Palette(2);
        screen.pen_mut().flags.insert(CellFlags::BOLD);
        screen.put_char('x');
        let snap = screen.snapshot();
        assert_eq!(snap.cells[0][0].fg, Color::Palette(2));
        assert!(snap.cells[0][0].flags.contains(CellFlags::BOLD));
    }
}
