//! Domain types shared across the workspace: chat entries, preferences,
//! feedback categories and the language catalog.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Timestamp format used for chat entries and account records.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Longest accepted username.
pub const MAX_USERNAME_LEN: usize = 64;

/// Current UTC time in the storage timestamp format.
pub fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One request/response pair in a tenant's chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub timestamp: String,
    pub user_input: String,
    pub generated_code: String,
}

impl ChatEntry {
    pub fn new(
        timestamp: impl Into<String>,
        user_input: impl Into<String>,
        generated_code: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            user_input: user_input.into(),
            generated_code: generated_code.into(),
        }
    }

    /// Entry stamped with the current time.
    pub fn now(user_input: impl Into<String>, generated_code: impl Into<String>) -> Self {
        Self::new(now_timestamp(), user_input, generated_code)
    }
}

/// Languages the assistant can be asked to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Python,
    JavaScript,
    Java,
    Cpp,
}

impl CodeLanguage {
    pub const ALL: [CodeLanguage; 4] = [
        CodeLanguage::Python,
        CodeLanguage::JavaScript,
        CodeLanguage::Java,
        CodeLanguage::Cpp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CodeLanguage::Python => "python",
            CodeLanguage::JavaScript => "javascript",
            CodeLanguage::Java => "java",
            CodeLanguage::Cpp => "cpp",
        }
    }

    /// Guesses the language of a snippet from a few telltale tokens.
    /// Falls back to Python when nothing matches.
    pub fn detect(code: &str) -> Self {
        let code = code.to_lowercase();
        if code.contains("def ") || code.contains("import ") || code.contains("print(") {
            CodeLanguage::Python
        } else if code.contains("function")
            || code.contains("var ")
            || code.contains("const ")
            || code.contains("let ")
            || code.contains("console.log")
        {
            CodeLanguage::JavaScript
        } else if code.contains("public class")
            || code.contains("void main")
            || code.contains("system.out.println")
        {
            CodeLanguage::Java
        } else if code.contains("cout <<") || code.contains("#include") || code.contains("int main")
        {
            CodeLanguage::Cpp
        } else {
            CodeLanguage::Python
        }
    }
}

impl Default for CodeLanguage {
    fn default() -> Self {
        CodeLanguage::Python
    }
}

impl fmt::Display for CodeLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for CodeLanguage {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(CodeLanguage::Python),
            "javascript" | "js" => Ok(CodeLanguage::JavaScript),
            "java" => Ok(CodeLanguage::Java),
            "cpp" | "c++" => Ok(CodeLanguage::Cpp),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

/// Feedback categories a user can give on a generated snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Poor,
    Neutral,
    Good,
    Excellent,
}

impl Feedback {
    pub const ALL: [Feedback; 4] = [
        Feedback::Poor,
        Feedback::Neutral,
        Feedback::Good,
        Feedback::Excellent,
    ];

    /// Reward applied to the bandit for this category.
    pub fn reward(&self) -> f64 {
        match self {
            Feedback::Poor => -1.0,
            Feedback::Neutral => 0.0,
            Feedback::Good => 1.0,
            Feedback::Excellent => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Poor => "poor",
            Feedback::Neutral => "neutral",
            Feedback::Good => "good",
            Feedback::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feedback category: {0}")]
pub struct UnknownFeedback(pub String);

impl FromStr for Feedback {
    type Err = UnknownFeedback;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poor" => Ok(Feedback::Poor),
            "neutral" => Ok(Feedback::Neutral),
            "good" => Ok(Feedback::Good),
            "excellent" => Ok(Feedback::Excellent),
            other => Err(UnknownFeedback(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PreferenceError {
    #[error("temperature {0} is outside 0.1..=1.0")]
    TemperatureOutOfRange(f64),
    #[error("speed {0} is outside 1..=10")]
    SpeedOutOfRange(u8),
}

/// Per-tenant generation preferences. Exactly one row of these exists in
/// every tenant store.
#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    pub temperature: f64,
    pub speed: u8,
    pub favorite_language: CodeLanguage,
}

impl Preferences {
    pub const TEMPERATURE_MIN: f64 = 0.1;
    pub const TEMPERATURE_MAX: f64 = 1.0;
    pub const SPEED_MIN: u8 = 1;
    pub const SPEED_MAX: u8 = 10;
    pub const DEFAULT_TEMPERATURE: f64 = 0.7;
    pub const DEFAULT_SPEED: u8 = 5;

    /// Validated constructor.
    pub fn new(
        temperature: f64,
        speed: u8,
        favorite_language: CodeLanguage,
    ) -> Result<Self, PreferenceError> {
        let prefs = Self {
            temperature,
            speed,
            favorite_language,
        };
        prefs.validate()?;
        Ok(prefs)
    }

    pub fn validate(&self) -> Result<(), PreferenceError> {
        if !(Self::TEMPERATURE_MIN..=Self::TEMPERATURE_MAX).contains(&self.temperature) {
            return Err(PreferenceError::TemperatureOutOfRange(self.temperature));
        }
        if !(Self::SPEED_MIN..=Self::SPEED_MAX).contains(&self.speed) {
            return Err(PreferenceError::SpeedOutOfRange(self.speed));
        }
        Ok(())
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            temperature: Self::DEFAULT_TEMPERATURE,
            speed: Self::DEFAULT_SPEED,
            favorite_language: CodeLanguage::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,
    #[error("username is too long (max 64 characters)")]
    TooLong,
    #[error("usernames may only contain letters, digits, '.', '_' and '-'")]
    InvalidCharacter,
}

/// Checks a username is usable as a tenant store key. Names double as
/// file names, so separators and control characters are rejected.
pub fn validate_username(name: &str) -> Result<(), UsernameError> {
    if name.is_empty() {
        return Err(UsernameError::Empty);
    }
    if name.len() > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong);
    }
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !ok {
        return Err(UsernameError::InvalidCharacter);
    }
    Ok(())
}
