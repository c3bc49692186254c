//! Character display output.
//!
//! The sample loop only ever writes through [`DisplayWriter`], which turns a
//! missing or failing device into a no-op so the loop never stops because of
//! the display.

pub mod lcd;
pub mod pages;

pub use lcd::Pcf8574Lcd;
pub use pages::{Page, PageCycler};

use crate::config::MAX_LCD_COLUMNS;
use colored::Colorize;
use thiserror::Error;
use tracing::{debug, warn};

/// One display row, already padded or truncated to the display width.
pub type Line = heapless::String<MAX_LCD_COLUMNS>;

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display bus error: {0}")]
    Bus(String),
    #[error("row {0} does not exist")]
    InvalidRow(usize),
}

/// A fixed-size text display. Writes are fire-and-forget.
pub trait CharDisplay {
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DisplayError>;
}

impl<T: CharDisplay + ?Sized> CharDisplay for Box<T> {
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        (**self).write_line(row, text)
    }
}

/// Left-justifies `text` into exactly `columns` characters.
pub fn fit_line(text: &str, columns: usize) -> Line {
    let columns = columns.min(MAX_LCD_COLUMNS);
    let mut line = Line::new();
    for c in text.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).take(columns) {
        let _ = line.push(c);
    }
    while line.len() < columns {
        let _ = line.push(' ');
    }
    line
}

/// No-op-safe wrapper around an optional display device.
pub struct DisplayWriter<D: CharDisplay> {
    device: Option<D>,
    failing: bool,
    write_failures: u32,
}

impl<D: CharDisplay> DisplayWriter<D> {
    pub fn new(device: Option<D>) -> Self {
        Self {
            device,
            failing: false,
            write_failures: 0,
        }
    }

    pub fn absent() -> Self {
        Self::new(None)
    }

    pub fn is_present(&self) -> bool {
        self.device.is_some()
    }

    pub fn write_failures(&self) -> u32 {
        self.write_failures
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn show(&mut self, page: &Page) {
        let Some(device) = self.device.as_mut() else {
            return;
        };

        let result = page
            .iter()
            .enumerate()
            .try_for_each(|(row, line)| device.write_line(row, line));

        match result {
            Ok(()) => {
                if self.failing {
                    debug!("Display writes recovered");
                }
                self.failing = false;
            }
            Err(e) => {
                self.write_failures = self.write_failures.saturating_add(1);
                // Only the first failure of a streak is worth a warning at 4 Hz
                if !self.failing {
                    warn!("Display write failed: {}", e);
                }
                self.failing = true;
            }
        }
    }
}

/// Development stand-in for the LCD: draws the two rows in a frame on stdout.
pub struct ConsoleDisplay {
    columns: usize,
    rows: [String; 2],
}

impl ConsoleDisplay {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            rows: [String::new(), String::new()],
        }
    }

    fn draw(&self) {
        let border = format!("+{}+", "-".repeat(self.columns));
        println!("{}", border.bright_blue());
        for row in &self.rows {
            println!("{}{}{}", "|".bright_blue(), row.bright_green().bold(), "|".bright_blue());
        }
        println!("{}", border.bright_blue());
    }
}

impl CharDisplay for ConsoleDisplay {
    fn write_line(&mut self, row: usize, text: &str) -> Result<(), DisplayError> {
        let slot = self.rows.get_mut(row).ok_or(DisplayError::InvalidRow(row))?;
        *slot = fit_line(text, self.columns).as_str().to_string();
        // Both rows are written per page; draw once the page is complete
        if row == 1 {
            self.draw();
        }
        Ok(())
    }
}
