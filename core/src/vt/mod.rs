//! Terminal emulation: turns a byte stream into a grid of styled cells.

pub mod parser;
pub mod screen;

pub use parser::Parser;
pub use screen::{Cell, CellFlags, Color, Screen, ScreenSnapshot};
