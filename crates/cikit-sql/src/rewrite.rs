//! Reference rewriting for restores into a renamed project or dataset
//!
//! A mapping pairs a source qualifier (`project.dataset` or `dataset`) with
//! its replacement. A table or routine reference whose qualifier equals a
//! key gets the mapped qualifier; bare names are left alone because they
//! already resolve against the object's own dataset.

use regex::{Captures, Regex};
use sqlparser::ast::{visit_expressions_mut, visit_relations_mut, Expr, Ident, ObjectName};
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use crate::dependencies::name_parts;
use crate::parser::{ParseError, SqlParser};

/// Source qualifier to destination qualifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMapping {
    entries: BTreeMap<String, String>,
}

impl ReferenceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping for moving `src_project.src_dataset` to `dst_project.dst_dataset`
    pub fn for_dataset(
        src_project: &str,
        src_dataset: &str,
        dst_project: &str,
        dst_dataset: &str,
    ) -> Self {
        let mut mapping = Self::new();
        mapping.insert(
            format!("{src_project}.{src_dataset}"),
            format!("{dst_project}.{dst_dataset}"),
        );
        mapping.insert(src_dataset, dst_dataset);
        mapping
    }

    pub fn insert(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        self.entries.insert(source.into(), destination.into());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Replacement parts for a dotted name, if its qualifier is mapped
    fn rewrite_parts(&self, parts: &[String]) -> Option<Vec<String>> {
        let (name, qualifier) = parts.split_last()?;
        if qualifier.is_empty() {
            return None;
        }
        let destination = self.get(&qualifier.join("."))?;
        let mut rewritten: Vec<String> = destination.split('.').map(str::to_string).collect();
        rewritten.push(name.clone());
        Some(rewritten)
    }

    fn rewrite_object_name(&self, name: &mut ObjectName) -> bool {
        match self.rewrite_parts(&name_parts(name)) {
            Some(parts) => {
                *name = ObjectName(parts.into_iter().map(to_ident).collect());
                true
            }
            None => false,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ReferenceMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        mapping.extend(iter);
        mapping
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ReferenceMapping {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (source, destination) in iter {
            self.insert(source, destination);
        }
    }
}

/// Plain identifiers stay bare, anything else (e.g. hyphenated project ids) is backticked
fn to_ident(part: String) -> Ident {
    let mut chars = part.chars();
    let plain = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        Ident::new(part)
    } else {
        Ident::with_quote('`', part)
    }
}

/// Rewrite table and qualified routine references in a SELECT statement.
///
/// The statement is parsed and re-serialized, so quoting stays valid. SQL
/// without any mapped reference is returned untouched.
pub fn rewrite_query_references(sql: &str, mapping: &ReferenceMapping) -> Result<String, ParseError> {
    if mapping.is_empty() {
        return Ok(sql.to_string());
    }

    let mut parsed = SqlParser::bigquery().parse(sql)?;
    let mut changed = false;

    for statement in parsed.statements.iter_mut() {
        let _ = visit_relations_mut(statement, |name: &mut ObjectName| {
            changed |= mapping.rewrite_object_name(name);
            ControlFlow::<()>::Continue(())
        });
        let _ = visit_expressions_mut(statement, |expr: &mut Expr| {
            if let Expr::Function(function) = expr {
                changed |= mapping.rewrite_object_name(&mut function.name);
            }
            ControlFlow::<()>::Continue(())
        });
    }

    if changed {
        Ok(parsed.to_sql())
    } else {
        Ok(sql.to_string())
    }
}

/// Rewrite qualified references in free-form SQL text (routine bodies).
///
/// A key only matches at an identifier boundary and only when followed by
/// a `.`, so `d` never rewrites `id.` or `other_d.t`. Longer keys win.
pub fn rewrite_text_references(text: &str, mapping: &ReferenceMapping) -> String {
    if mapping.is_empty() {
        return text.to_string();
    }

    let mut keys: Vec<&String> = mapping.entries.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");

    let pattern = format!(r"(^|[^A-Za-z0-9_.\-])({alternation})(`?\.)");
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(error = %e, "Reference pattern rejected, leaving text unchanged");
            return text.to_string();
        }
    };

    re.replace_all(text, |caps: &Captures| {
        let source = &caps[2];
        let destination = mapping.get(source).unwrap_or(source);
        format!("{}{}{}", &caps[1], destination, &caps[3])
    })
    .into_owned()
}
