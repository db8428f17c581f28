//! Terminal test double.
//!
//! Records everything a handler does to its terminal so tests can assert
//! on LED colors, buzzes and LCD contents without hardware on the line.

use std::time::Duration;

use earl_core::Tone;
use earl_core::constants::{MAX_LCD_COLS, MAX_LCD_ROWS};

use crate::traits::Terminal;

#[derive(Debug)]
pub struct MockTerminal {
    name: String,
    /// Concatenation of every `show_color` argument, in call order.
    pub colors: String,
    /// Every `show_color` argument, in call order ("" is LEDs off).
    pub color_calls: Vec<String>,
    /// Every buzz, in call order.
    pub buzzes: Vec<(Tone, Duration)>,
    /// Current LCD contents.
    pub lcd: [String; MAX_LCD_ROWS],
}

impl MockTerminal {
    pub fn new(name: impl Into<String>) -> Self {
        MockTerminal {
            name: name.into(),
            colors: String::new(),
            color_calls: Vec::new(),
            buzzes: Vec::new(),
            lcd: Default::default(),
        }
    }

    /// Assert that `color` was shown at some point.
    #[track_caller]
    pub fn expect_color(&self, color: &str) {
        assert!(
            self.colors.contains(color),
            "expected color '{color}', saw '{}'",
            self.colors
        );
    }

    /// Pop and check the oldest recorded buzz.
    #[track_caller]
    pub fn expect_buzz(&mut self, tone: Tone, duration: Duration) {
        assert!(!self.buzzes.is_empty(), "expected a buzz, heard nothing");
        let (got_tone, got_duration) = self.buzzes.remove(0);
        assert_eq!((got_tone, got_duration), (tone, duration));
    }

    #[track_caller]
    pub fn expect_silence(&self) {
        assert!(
            self.buzzes.is_empty(),
            "expected silence, heard {:?}",
            self.buzzes
        );
    }
}

impl Terminal for MockTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write_lcd(&mut self, row: usize, text: &str) {
        if row >= MAX_LCD_ROWS {
            return;
        }
        self.lcd[row] = text.chars().take(MAX_LCD_COLS).collect();
    }

    async fn show_color(&mut self, colors: &str) {
        self.colors.push_str(colors);
        self.color_calls.push(colors.to_string());
    }

    async fn buzz_speaker(&mut self, tone: Tone, duration: Duration) {
        self.buzzes.push((tone, duration));
    }
}
