//! Output file naming.
//!
//! A [`NamingTemplate`] turns a song name, a watermark name and an extension
//! into a deliverable file name. Given the same template, inputs, and date
//! the result is always the same.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Joiner placed between name components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeparatorStyle {
    #[default]
    Underscore,
    Dash,
    Space,
    Dot,
}

impl SeparatorStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeparatorStyle::Underscore => "_",
            SeparatorStyle::Dash => "-",
            SeparatorStyle::Space => " ",
            SeparatorStyle::Dot => ".",
        }
    }
}

/// Template controlling how deliverables are named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingTemplate {
    pub include_original_filename: bool,
    pub include_watermark_name: bool,
    pub include_date: bool,
    /// `chrono` strftime format used when `include_date` is set.
    pub date_format: String,
    pub custom_prefix: String,
    pub custom_suffix: String,
    pub separator: SeparatorStyle,
}

impl Default for NamingTemplate {
    fn default() -> Self {
        Self {
            include_original_filename: true,
            include_watermark_name: false,
            include_date: false,
            date_format: "%Y-%m-%d".into(),
            custom_prefix: String::new(),
            custom_suffix: String::new(),
            separator: SeparatorStyle::Underscore,
        }
    }
}

impl NamingTemplate {
    /// Build a file name using today's local date.
    pub fn file_name(&self, song: &str, watermark: &str, extension: &str) -> String {
        self.file_name_on(chrono::Local::now().date_naive(), song, watermark, extension)
    }

    /// Build a file name for the given date.
    ///
    /// `song` and `watermark` are names without extension. Empty components
    /// are skipped; if nothing is left the song name is used.
    pub fn file_name_on(
        &self,
        date: NaiveDate,
        song: &str,
        watermark: &str,
        extension: &str,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        let prefix = self.custom_prefix.trim();
        if !prefix.is_empty() {
            parts.push(prefix.to_string());
        }
        if self.include_original_filename && !song.trim().is_empty() {
            parts.push(song.trim().to_string());
        }
        if self.include_watermark_name && !watermark.trim().is_empty() {
            parts.push(watermark.trim().to_string());
        }
        if self.include_date && !self.date_format.trim().is_empty() {
            parts.push(date.format(&self.date_format).to_string());
        }
        let suffix = self.custom_suffix.trim();
        if !suffix.is_empty() {
            parts.push(suffix.to_string());
        }

        let has_name_component = (self.include_original_filename && !song.trim().is_empty())
            || (self.include_watermark_name && !watermark.trim().is_empty());
        if !has_name_component {
            // Prefix/suffix/date alone would collide across songs.
            let insert_at = usize::from(!prefix.is_empty());
            parts.insert(insert_at, song.trim().to_string());
        }

        let stem = sanitize(&parts.join(self.separator.as_str()));
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() {
            stem
        } else {
            format!("{stem}.{extension}")
        }
    }
}

/// Replace characters that are illegal in file names on common platforms.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
