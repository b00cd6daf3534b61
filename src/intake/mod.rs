//! Step-driven intake conversations.

pub mod catalog;
pub mod category;
pub mod commit;
pub mod engine;
pub mod responder;
pub mod session;
pub mod validator;

pub use catalog::{DatabaseCatalog, FieldRule, InputKind, StaticCatalog, StepCatalog, StepDefinition};
pub use category::Category;
pub use commit::{CommitCoordinator, CompletedRecord};
pub use engine::IntakeEngine;
pub use responder::{Reply, render};
pub use session::{Session, SessionStore};
pub use validator::ValidationFailure;
