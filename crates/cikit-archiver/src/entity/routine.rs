//! User-defined functions and stored procedures

use cikit_cloud::{QueryRequest, RoutineArgument, UpdateField, Warehouse};
use cikit_core::RestoreConfig;
use cikit_sql::{rewrite_text_references, ReferenceMapping};
use serde::{Deserialize, Serialize};

use super::header::EntityHeader;
use crate::error::EntityError;

pub(crate) const FUNCTION_TAG: &str = "function";
pub(crate) const PROCEDURE_TAG: &str = "stored_procedure";

fn default_language() -> String {
    "SQL".to_string()
}

/// Which DDL recreates the routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineType {
    Function,
    Procedure,
}

/// A function or procedure; the owning [`super::ArchiveEntity`] variant says which
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineEntity {
    #[serde(flatten)]
    pub header: EntityHeader,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub imported_libraries: Vec<String>,

    #[serde(default)]
    pub arguments: Vec<RoutineArgument>,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub return_type: Option<String>,
}

impl RoutineEntity {
    pub fn new(header: EntityHeader) -> Self {
        Self {
            header,
            body: String::new(),
            imported_libraries: Vec::new(),
            arguments: Vec::new(),
            language: default_language(),
            return_type: None,
        }
    }

    /// Bodies are scripts or expressions, so references are substituted textually
    pub fn modify_body(&mut self, mapping: &ReferenceMapping) {
        self.body = rewrite_text_references(&self.body, mapping);
    }

    fn argument_list(&self) -> String {
        self.arguments
            .iter()
            .map(|arg| format!("{} {}", arg.name, arg.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_statement(&self, routine_type: RoutineType) -> String {
        let fqi = self.header.fully_qualified_identity();
        match routine_type {
            RoutineType::Procedure => {
                format!("CREATE PROCEDURE `{fqi}`({})\n{}", self.argument_list(), self.body)
            }
            RoutineType::Function => {
                let mut statement = format!("CREATE FUNCTION `{fqi}`({})", self.argument_list());
                if let Some(return_type) = &self.return_type {
                    statement.push_str(&format!("\nRETURNS {return_type}"));
                }
                let language = self.language.to_ascii_uppercase();
                match language.as_str() {
                    "JAVASCRIPT" => statement.push_str("\nLANGUAGE js"),
                    "PYTHON" => statement.push_str("\nLANGUAGE python"),
                    _ => {}
                }
                if !self.imported_libraries.is_empty() {
                    let libraries = self
                        .imported_libraries
                        .iter()
                        .map(|lib| format!("\"{lib}\""))
                        .collect::<Vec<_>>()
                        .join(", ");
                    statement.push_str(&format!("\nOPTIONS (library = [{libraries}])"));
                }
                if language == "SQL" {
                    statement.push_str(&format!("\nAS ({})", self.body));
                } else {
                    statement.push_str(&format!("\nAS r\"\"\"{}\"\"\"", self.body));
                }
                statement
            }
        }
    }

    pub(crate) async fn fetch(&mut self, warehouse: &dyn Warehouse) -> Result<(), EntityError> {
        let routine = warehouse.get_routine(&self.header.source()).await?;
        self.body = routine.body;
        self.imported_libraries = routine.imported_libraries;
        self.arguments = routine.arguments;
        self.language = if routine.language.is_empty() {
            default_language()
        } else {
            routine.language
        };
        self.return_type = routine.return_type;
        self.header.metadata.description = routine.description;
        Ok(())
    }

    pub(crate) async fn restore(
        &self,
        warehouse: &dyn Warehouse,
        config: &RestoreConfig,
        routine_type: RoutineType,
    ) -> Result<(), EntityError> {
        let target = self.header.target();
        if config.overwrite_existing {
            warehouse.delete_routine(&target, true).await?;
        }

        let statement = QueryRequest::new(self.create_statement(routine_type))
            .with_job_id_prefix(self.header.job_id_prefix("restore"));
        warehouse.query(&statement).await?;

        // Routines carry no labels; only the description is patched in
        let mut routine = warehouse.get_routine(&target).await?;
        routine.description = self.header.metadata.description.clone();
        warehouse
            .update_routine(&routine, &[UpdateField::Description])
            .await?;
        Ok(())
    }
}
