//! Supported subtitle languages.

use crate::error::{Result, SubtitleError};

/// Language codes accepted for output, with their display names
pub const LANGUAGE_CODES: &[(&str, &str)] = &[
    ("bg", "Bulgarian"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("en-gb", "English (British)"),
    ("en-us", "English (American)"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("nb", "Norwegian (Bokmål)"),
    ("nl", "Dutch"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("pt-br", "Portuguese (Brazilian)"),
    ("pt-pt", "Portuguese (European)"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sv", "Swedish"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("zh", "Chinese (simplified)"),
];

/// Display name for a language code, if supported
pub fn language_name(code: &str) -> Option<&'static str> {
    let code = code.to_lowercase();
    LANGUAGE_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

/// Parse a comma-separated language list into normalized codes.
///
/// Codes are trimmed and lower-cased, duplicates are dropped while keeping
/// the first occurrence, and unknown codes are rejected.
pub fn parse_languages(languages: &str) -> Result<Vec<String>> {
    let mut parsed: Vec<String> = Vec::new();
    for raw in languages.split(',') {
        let code = raw.trim().to_lowercase();
        if code.is_empty() {
            continue;
        }
        if language_name(&code).is_none() {
            return Err(SubtitleError::UnsupportedLanguage(code));
        }
        if !parsed.contains(&code) {
            parsed.push(code);
        }
    }

    if parsed.is_empty() {
        return Err(SubtitleError::Config("at least one output language is required".to_string()));
    }
    Ok(parsed)
}
