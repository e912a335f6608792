//! Account search
//!
//! The query string is tokenized ([`tokenizer`]), resolved against the
//! vault into predicates ([`filter`]) and evaluated by
//! [`AccountSearchService`] together with the visibility rules.

pub mod filter;
mod service;
pub mod tokenizer;

pub use filter::{AccountQuery, AccountSearchFilter, Clause, SortKey, SortOrder};
pub use service::{AccountSearchItem, AccountSearchResult, AccountSearchService};
pub use tokenizer::{tokenize, ConditionKind, FilterField, FilterOperator, SearchTokens};
