//! # Display Page Cycler
//!
//! The display shows one two-line page at a time. The page set is rebuilt
//! from every sample, while a fractional cursor advances by
//! `tick_interval / page_switch_interval` per tick, so each page stays up for
//! one page-switch interval regardless of the sample rate.

use super::{fit_line, Line};
use crate::config::MAX_PAGES;
use heapless::Vec;

/// Two display lines.
pub type Page = [Line; 2];

#[derive(Debug)]
pub struct PageCycler {
    pages: Vec<Page, MAX_PAGES>,
    cursor: f64,
    step: f64,
    columns: usize,
}

impl PageCycler {
    pub fn new(step: f64, columns: usize) -> Self {
        Self {
            pages: Vec::new(),
            cursor: 0.0,
            step,
            columns,
        }
    }

    /// Starts the cursor somewhere other than the first page.
    pub fn with_cursor(mut self, cursor: f64) -> Self {
        self.cursor = cursor;
        self
    }

    /// Replaces the page set; pages beyond the display's page capacity are dropped.
    pub fn set_pages<I, S>(&mut self, pages: I)
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        self.pages.clear();
        for (first, second) in pages {
            let page = [
                fit_line(first.as_ref(), self.columns),
                fit_line(second.as_ref(), self.columns),
            ];
            if self.pages.push(page).is_err() {
                break;
            }
        }

        // Page count may have shrunk since the last tick
        if !self.pages.is_empty() {
            self.cursor %= self.pages.len() as f64;
        }
    }

    /// Pairs a flat list of lines into pages; an odd trailing line gets a
    /// blank partner.
    pub fn set_lines<S: AsRef<str>>(&mut self, lines: &[S]) {
        self.set_pages(lines.chunks(2).map(|pair| {
            let first = pair[0].as_ref();
            let second = pair.get(1).map_or("", |s| s.as_ref());
            (first, second)
        }));
    }

    pub fn advance_and_render(&mut self) -> Page {
        if self.pages.is_empty() {
            return [fit_line("", self.columns), fit_line("", self.columns)];
        }

        self.cursor = (self.cursor + self.step) % self.pages.len() as f64;
        self.pages[self.current_index()].clone()
    }

    pub fn current_index(&self) -> usize {
        (self.cursor.floor() as usize).min(self.pages.len().saturating_sub(1))
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn columns(&self) -> usize {
        self.columns
    }
}
