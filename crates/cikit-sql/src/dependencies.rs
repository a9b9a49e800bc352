//! Table dependency extraction
//!
//! Finds every table a query reads from, minus common-table-expression
//! aliases. Names are returned with only the parts written in the SQL;
//! [`qualify_dependency`] fills in the rest for a given home dataset.

use sqlparser::ast::{visit_relations, ObjectName, Query, Visit, Visitor};
use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::parser::{ParseError, SqlParser};

/// Extract the tables referenced by a BigQuery SELECT statement.
///
/// CTE aliases defined anywhere in the statement are added to `exclusions`,
/// and every name in `exclusions` is left out of the result.
pub fn extract_dependencies(
    sql: &str,
    exclusions: &mut HashSet<String>,
) -> Result<HashSet<String>, ParseError> {
    let parsed = SqlParser::bigquery().parse(sql)?;

    let mut ctes = CteCollector {
        aliases: exclusions,
    };
    for statement in &parsed.statements {
        let _ = statement.visit(&mut ctes);
    }

    let mut relations = HashSet::new();
    for statement in &parsed.statements {
        let _ = visit_relations(statement, |name: &ObjectName| {
            relations.insert(qualified_name(name));
            ControlFlow::<()>::Continue(())
        });
    }

    Ok(relations
        .into_iter()
        .filter(|name| !exclusions.contains(name))
        .collect())
}

/// Collects CTE aliases from every (sub)query
struct CteCollector<'a> {
    aliases: &'a mut HashSet<String>,
}

impl Visitor for CteCollector<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.aliases.insert(cte.alias.name.value.clone());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Dotted name of a relation.
///
/// A backtick-quoted `project.dataset.table` arrives as one identifier,
/// so every part is split on dots.
pub(crate) fn name_parts(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .flat_map(|ident| ident.value.split('.'))
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn qualified_name(name: &ObjectName) -> String {
    name_parts(name).join(".")
}

/// Expand a dependency to `project.dataset.name`.
///
/// One part gets the home project and dataset, two parts get the home
/// project, three or more parts are kept as written.
pub fn qualify_dependency(name: &str, project_id: &str, dataset: &str) -> String {
    match name.split('.').count() {
        1 => format!("{project_id}.{dataset}.{name}"),
        2 => format!("{project_id}.{name}"),
        _ => name.to_string(),
    }
}

pub fn qualify_dependencies(
    names: impl IntoIterator<Item = String>,
    project_id: &str,
    dataset: &str,
) -> HashSet<String> {
    names
        .into_iter()
        .map(|name| qualify_dependency(&name, project_id, dataset))
        .collect()
}
