//! Education-level categories that branch the intake flow.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CATEGORY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(TK|SD|SMP|SMA)\b").expect("category regex is valid"));

/// The fixed set of categories an applicant can register for.
///
/// Stored and serialized by its uppercase code (`"TK"`, `"SD"`, ...), which
/// is also the key used by the step catalog, the quota table, and the FAQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "TK")]
    Tk,
    #[serde(rename = "SD")]
    Sd,
    #[serde(rename = "SMP")]
    Smp,
    #[serde(rename = "SMA")]
    Sma,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Tk, Category::Sd, Category::Smp, Category::Sma];

    /// The storage code for this category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Tk => "TK",
            Self::Sd => "SD",
            Self::Smp => "SMP",
            Self::Sma => "SMA",
        }
    }

    /// Parse an exact category code (case-insensitive, surrounding whitespace ignored).
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
    }

    /// Find the first category token in free text.
    ///
    /// Matching is case-insensitive and word-bounded, so `"SD Negeri"` matches
    /// but `"SDN"` does not. When several tokens appear, the leftmost wins.
    pub fn find_in(text: &str) -> Option<Self> {
        CATEGORY_TOKEN
            .find(text)
            .and_then(|m| Self::from_code(m.as_str()))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| format!("unknown category: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_code_is_case_insensitive() {
        assert_eq!(Category::from_code("sd"), Some(Category::Sd));
        assert_eq!(Category::from_code(" SMA "), Some(Category::Sma));
        assert_eq!(Category::from_code("SMK"), None);
    }

    #[test]
    fn find_in_respects_word_boundaries() {
        assert_eq!(Category::find_in("biaya sd berapa?"), Some(Category::Sd));
        assert_eq!(Category::find_in("SDN 1 Bandung"), None);
        assert_eq!(Category::find_in("tksd"), None);
    }

    #[test]
    fn find_in_takes_leftmost_token() {
        assert_eq!(Category::find_in("SMP atau TK"), Some(Category::Smp));
    }

    #[test]
    fn display_matches_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(format!("\"{category}\""), json);
        }
    }
}
