//! Step catalog: resolves the instruction for a `(step, category)` pair.
//!
//! Branching lives entirely in the data: a category that needs extra
//! documents simply has definitions for step numbers the others lack.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::category::Category;
use crate::store::Database;

/// What kind of message a step expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Image,
    Document,
}

impl InputKind {
    /// Whether this step expects an upload rather than typed text.
    pub fn is_file(&self) -> bool {
        !matches!(self, Self::Text)
    }
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Document => "document",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "document" => Ok(Self::Document),
            other => Err(format!("unknown input kind: {other}")),
        }
    }
}

/// Which validator a text step runs its answer through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    #[default]
    FreeText,
    CompositeIdentity,
    Category,
    Date,
    FamilyId,
}

impl std::fmt::Display for FieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FreeText => "free_text",
            Self::CompositeIdentity => "composite_identity",
            Self::Category => "category",
            Self::Date => "date",
            Self::FamilyId => "family_id",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FieldRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free_text" => Ok(Self::FreeText),
            "composite_identity" => Ok(Self::CompositeIdentity),
            "category" => Ok(Self::Category),
            "date" => Ok(Self::Date),
            "family_id" => Ok(Self::FamilyId),
            other => Err(format!("unknown field rule: {other}")),
        }
    }
}

/// One instruction in the intake flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step: u32,
    /// `None` marks a fallback usable by any category.
    #[serde(default)]
    pub category: Option<Category>,
    pub instruction: String,
    pub input_kind: InputKind,
    pub field_key: String,
    #[serde(default)]
    pub rule: FieldRule,
    /// Set on the final required step; completing it triggers the commit.
    #[serde(default)]
    pub terminal: bool,
}

impl StepDefinition {
    pub fn text(step: u32, field_key: &str, instruction: &str) -> Self {
        Self {
            step,
            category: None,
            instruction: instruction.to_string(),
            input_kind: InputKind::Text,
            field_key: field_key.to_string(),
            rule: FieldRule::FreeText,
            terminal: false,
        }
    }

    pub fn upload(step: u32, kind: InputKind, field_key: &str, instruction: &str) -> Self {
        Self {
            input_kind: kind,
            ..Self::text(step, field_key, instruction)
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Read path into the instruction catalog.
///
/// Backend failures are reported as `None`; the engine applies one policy
/// to every missing instruction regardless of cause.
#[async_trait]
pub trait StepCatalog: Send + Sync {
    async fn lookup(&self, step: u32, category: Option<Category>) -> Option<StepDefinition>;
}

/// Pick the definition for `category` among all rows sharing a step number.
///
/// A category-specific row wins over the category-less fallback. Among rows
/// with the same key the earliest (in `rows` order) wins, so repeated
/// lookups are stable even if the source holds duplicates.
pub fn select_definition<'a>(
    rows: &'a [StepDefinition],
    category: Option<Category>,
) -> Option<&'a StepDefinition> {
    let specific = category.and_then(|c| rows.iter().find(|r| r.category == Some(c)));
    specific.or_else(|| rows.iter().find(|r| r.category.is_none()))
}

/// A catalog held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    definitions: Vec<StepDefinition>,
}

impl StaticCatalog {
    pub fn new(definitions: Vec<StepDefinition>) -> Self {
        Self { definitions }
    }

    /// Parse a JSON array of step definitions.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn definitions(&self) -> &[StepDefinition] {
        &self.definitions
    }
}

#[async_trait]
impl StepCatalog for StaticCatalog {
    async fn lookup(&self, step: u32, category: Option<Category>) -> Option<StepDefinition> {
        let rows: Vec<StepDefinition> = self
            .definitions
            .iter()
            .filter(|d| d.step == step)
            .cloned()
            .collect();
        select_definition(&rows, category).cloned()
    }
}

/// Catalog backed by the `form_steps` table.
pub struct DatabaseCatalog {
    db: Arc<dyn Database>,
}

impl DatabaseCatalog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StepCatalog for DatabaseCatalog {
    async fn lookup(&self, step: u32, category: Option<Category>) -> Option<StepDefinition> {
        match self.db.list_steps(step).await {
            Ok(rows) => select_definition(&rows, category).cloned(),
            Err(e) => {
                warn!(step, category = ?category, error = %e, "Step lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StaticCatalog {
        StaticCatalog::new(vec![
            StepDefinition::text(1, "data_diri", "Kirim data diri")
                .with_rule(FieldRule::CompositeIdentity),
            StepDefinition::upload(2, InputKind::Image, "kk", "Foto KK"),
            StepDefinition::upload(3, InputKind::Image, "rapor", "Foto rapor")
                .with_category(Category::Smp),
            StepDefinition::upload(3, InputKind::Image, "foto", "Pas foto (fallback)").terminal(),
            StepDefinition::upload(3, InputKind::Image, "foto", "Pas foto TK")
                .with_category(Category::Tk)
                .terminal(),
        ])
    }

    #[tokio::test]
    async fn null_category_lookup_ignores_specific_rows() {
        let catalog = sample();
        let def = catalog.lookup(3, None).await.unwrap();
        assert_eq!(def.instruction, "Pas foto (fallback)");
    }

    #[tokio::test]
    async fn specific_row_wins_over_fallback() {
        let catalog = sample();
        let def = catalog.lookup(3, Some(Category::Smp)).await.unwrap();
        assert_eq!(def.field_key, "rapor");
        let def = catalog.lookup(3, Some(Category::Tk)).await.unwrap();
        assert_eq!(def.instruction, "Pas foto TK");
    }

    #[tokio::test]
    async fn fallback_used_when_no_specific_row() {
        let catalog = sample();
        let def = catalog.lookup(2, Some(Category::Sma)).await.unwrap();
        assert_eq!(def.field_key, "kk");
        let def = catalog.lookup(3, Some(Category::Sd)).await.unwrap();
        assert_eq!(def.instruction, "Pas foto (fallback)");
    }

    #[tokio::test]
    async fn missing_step_is_none() {
        assert!(sample().lookup(9, Some(Category::Sd)).await.is_none());
    }

    #[test]
    fn duplicates_resolve_to_first_row() {
        let rows = vec![
            StepDefinition::text(4, "alamat", "first").with_category(Category::Sd),
            StepDefinition::text(4, "alamat", "second").with_category(Category::Sd),
        ];
        for _ in 0..3 {
            let def = select_definition(&rows, Some(Category::Sd)).unwrap();
            assert_eq!(def.instruction, "first");
        }
    }

    #[test]
    fn from_json_applies_defaults() {
        let catalog = StaticCatalog::from_json(
            r#"[{"step": 1, "instruction": "Nama?", "input_kind": "text", "field_key": "nama"}]"#,
        )
        .unwrap();
        let def = &catalog.definitions()[0];
        assert_eq!(def.category, None);
        assert_eq!(def.rule, FieldRule::FreeText);
        assert!(!def.terminal);
    }
}
