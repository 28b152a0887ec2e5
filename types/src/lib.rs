//! Core domain types for ctxbudget.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod budget;
mod ids;
mod item;
mod settings;

pub use budget::Budget;
pub use ids::{ItemId, Sequence};
pub use item::{
    COMPACTION_KIND, ContentBlock, ConversationItem, Importance, ItemBody, Role, TOOL_RESULT_KIND,
    TokenEstimate,
};
pub use settings::{EstimatorSettings, EstimatorStrategy, PolicySettings, SettingsError};
