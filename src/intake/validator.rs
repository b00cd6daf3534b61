//! Answer validation: pure functions from raw input to normalized values.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::catalog::InputKind;
use super::category::Category;
use crate::channels::MessageKind;

/// Separator between the parts of a composite identity answer.
pub const IDENTITY_DELIMITER: char = '#';

/// Number of digits in a family (household) identifier.
pub const FAMILY_ID_DIGITS: usize = 16;

static DATE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date regex is valid"));

static FAMILY_ID_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(&format!(r"^\d{{{FAMILY_ID_DIGITS}}}$")).expect("family id regex is valid")
    });

/// Why an answer was rejected. Always user-correctable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("answer is empty")]
    Empty,

    #[error("expected four '#'-separated parts")]
    BadFormat,

    #[error("date is not in YYYY-MM-DD format")]
    BadDate,

    #[error("category is not one of TK/SD/SMP/SMA")]
    BadCategory,

    #[error("family identifier must be exactly 16 digits")]
    BadIdentifier,

    #[error("no known category in answer")]
    UnknownCategory,

    #[error("expected {expected} upload, received {received}")]
    WrongKind {
        expected: InputKind,
        received: MessageKind,
    },

    #[error("category already set to {current}")]
    CategoryLocked { current: Category },
}

/// The four values carried by a composite identity answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAnswer {
    pub name: String,
    pub birthdate: String,
    pub category: Category,
    pub family_id: String,
}

/// Free text: trimmed, must not be empty.
pub fn text(raw: &str) -> Result<String, ValidationFailure> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationFailure::Empty);
    }
    Ok(trimmed.to_string())
}

/// A calendar date written as `YYYY-MM-DD`.
pub fn date(raw: &str) -> Result<String, ValidationFailure> {
    let trimmed = raw.trim();
    if !DATE_SHAPE.is_match(trimmed) || NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_err() {
        return Err(ValidationFailure::BadDate);
    }
    Ok(trimmed.to_string())
}

/// A family identifier: exactly sixteen digits once whitespace is removed.
pub fn family_id(raw: &str) -> Result<String, ValidationFailure> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if !FAMILY_ID_SHAPE.is_match(&compact) {
        return Err(ValidationFailure::BadIdentifier);
    }
    Ok(compact)
}

/// The first category token mentioned in the answer.
pub fn category(raw: &str) -> Result<Category, ValidationFailure> {
    Category::find_in(raw).ok_or(ValidationFailure::UnknownCategory)
}

/// `Name#YYYY-MM-DD#Category#FamilyId`, all four parts required.
///
/// Empty segments are dropped before counting, so a leading `#` (as in
/// `#Name #2016-05-02 #SD #1234...`) is accepted.
pub fn composite_identity(raw: &str) -> Result<IdentityAnswer, ValidationFailure> {
    let parts: Vec<&str> = raw
        .split(IDENTITY_DELIMITER)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let [name, birthdate, category_token, family] = parts.as_slice() else {
        return Err(ValidationFailure::BadFormat);
    };

    let birthdate = date(birthdate)?;
    let category = Category::find_in(category_token).ok_or(ValidationFailure::BadCategory)?;
    let family_id = family_id(family)?;

    Ok(IdentityAnswer {
        name: name.to_string(),
        birthdate,
        category,
        family_id,
    })
}

/// The inbound message must be an upload of the expected kind.
pub fn file(received: MessageKind, expected: InputKind) -> Result<(), ValidationFailure> {
    let matches = matches!(
        (received, expected),
        (MessageKind::Image, InputKind::Image) | (MessageKind::Document, InputKind::Document)
    );
    if matches {
        Ok(())
    } else {
        Err(ValidationFailure::WrongKind { expected, received })
    }
}

/// The inbound message must be of the kind the step asks for.
///
/// A captioned upload is still an upload and never answers a text step.
pub fn kind(received: MessageKind, expected: InputKind) -> Result<(), ValidationFailure> {
    if expected.is_file() {
        file(received, expected)
    } else if received == MessageKind::Text {
        Ok(())
    } else {
        Err(ValidationFailure::WrongKind { expected, received })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_trims_and_rejects_blank() {
        assert_eq!(text("  Jl. Merdeka 5 ").unwrap(), "Jl. Merdeka 5");
        assert_eq!(text("   "), Err(ValidationFailure::Empty));
    }

    #[test]
    fn composite_identity_accepts_canonical_answer() {
        let parsed = composite_identity("Ana Putri#2016-05-02#SD#1234567890123456").unwrap();
        assert_eq!(
            parsed,
            IdentityAnswer {
                name: "Ana Putri".into(),
                birthdate: "2016-05-02".into(),
                category: Category::Sd,
                family_id: "1234567890123456".into(),
            }
        );
    }

    #[test]
    fn composite_identity_accepts_leading_delimiter_and_spaces() {
        let parsed =
            composite_identity("#Budi Santoso #2010-01-31 #smp #1234 5678 9012 3456").unwrap();
        assert_eq!(parsed.name, "Budi Santoso");
        assert_eq!(parsed.category, Category::Smp);
        assert_eq!(parsed.family_id, "1234567890123456");
    }

    #[test]
    fn composite_identity_rejects_missing_parts() {
        assert_eq!(
            composite_identity("Ana Putri#2016-05-02#SD"),
            Err(ValidationFailure::BadFormat)
        );
        assert_eq!(
            composite_identity("Ana Putri##SD#1234567890123456"),
            Err(ValidationFailure::BadFormat)
        );
        assert_eq!(composite_identity(""), Err(ValidationFailure::BadFormat));
    }

    #[test]
    fn composite_identity_rejects_extra_parts() {
        assert_eq!(
            composite_identity("Ana#Putri#2016-05-02#SD#1234567890123456"),
            Err(ValidationFailure::BadFormat)
        );
    }

    #[test]
    fn composite_identity_reports_first_bad_field() {
        assert_eq!(
            composite_identity("Ana#02-05-2016#SD#1234567890123456"),
            Err(ValidationFailure::BadDate)
        );
        assert_eq!(
            composite_identity("Ana#2016-05-02#SMK#1234567890123456"),
            Err(ValidationFailure::BadCategory)
        );
        assert_eq!(
            composite_identity("Ana#2016-05-02#SD#12345"),
            Err(ValidationFailure::BadIdentifier)
        );
    }

    #[test]
    fn date_rejects_impossible_calendar_days() {
        assert_eq!(date("2016-02-30"), Err(ValidationFailure::BadDate));
        assert_eq!(date("2016-5-2"), Err(ValidationFailure::BadDate));
        assert_eq!(date("2016-02-29").unwrap(), "2016-02-29");
    }

    #[test]
    fn family_id_length_boundaries() {
        assert_eq!(family_id(&"1".repeat(15)), Err(ValidationFailure::BadIdentifier));
        assert_eq!(family_id(&"1".repeat(17)), Err(ValidationFailure::BadIdentifier));
        assert_eq!(family_id(&"1".repeat(16)).unwrap(), "1".repeat(16));
        assert_eq!(
            family_id("12345678901234ab"),
            Err(ValidationFailure::BadIdentifier)
        );
    }

    #[test]
    fn category_finds_first_token() {
        assert_eq!(category("mau daftar sma").unwrap(), Category::Sma);
        assert_eq!(category("kelas satu"), Err(ValidationFailure::UnknownCategory));
    }

    #[test]
    fn file_requires_matching_upload() {
        assert!(file(MessageKind::Image, InputKind::Image).is_ok());
        assert!(file(MessageKind::Document, InputKind::Document).is_ok());
        assert_eq!(
            file(MessageKind::Text, InputKind::Image),
            Err(ValidationFailure::WrongKind {
                expected: InputKind::Image,
                received: MessageKind::Text,
            })
        );
        assert!(file(MessageKind::Video, InputKind::Image).is_err());
        assert!(file(MessageKind::Image, InputKind::Text).is_err());
    }

    #[test]
    fn text_steps_take_only_text_messages() {
        assert!(kind(MessageKind::Text, InputKind::Text).is_ok());
        for received in [MessageKind::Image, MessageKind::Document, MessageKind::Video] {
            assert_eq!(
                kind(received, InputKind::Text),
                Err(ValidationFailure::WrongKind {
                    expected: InputKind::Text,
                    received,
                })
            );
        }
    }
}
