//! SQL parsing and analysis
//!
//! This crate handles:
//! - Parsing BigQuery SQL using sqlparser-rs
//! - Extracting the tables a SELECT statement reads from
//! - Rewriting qualified table and routine references for renamed datasets

pub mod dependencies;
pub mod parser;
pub mod rewrite;

pub use dependencies::{extract_dependencies, qualify_dependencies, qualify_dependency};
pub use parser::{ParseError, ParsedSql, SqlParser};
pub use rewrite::{rewrite_query_references, rewrite_text_references, ReferenceMapping};
