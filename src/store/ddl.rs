use crate::error::{CrateError, Result};
use crate::schema::IndexKind;
use sqlparser::ast::{ColumnOption, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// One ordered-column constraint extracted from a `CREATE TABLE` string.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub kind: IndexKind,
    pub columns: Vec<String>,
}

/// Given a `CREATE TABLE` string, returns its ordered constraints (§6). A
/// real deployment's DDL parser may additionally understand dialect-specific
/// `SHOW CREATE TABLE` output; this crate only needs standard `CREATE TABLE`
/// syntax, which is what warm-up (§4.4/§4.5) feeds it.
pub trait DdlParser: Send + Sync {
    fn parse_constraints(&self, create_table_sql: &str) -> Result<Vec<Constraint>>;
}

/// A `sqlparser`-backed `DdlParser`, narrowed from the teacher's general
/// statement parser (`SqlParser` in the original `parser` module) down to
/// the single job this crate needs: constraint extraction. Only
/// column-level `PRIMARY KEY`/`UNIQUE` options are recognized; table-level
/// multi-column constraint clauses are not (see DESIGN.md).
pub struct SqlDdlParser {
    dialect: GenericDialect,
}

impl SqlDdlParser {
    pub fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }
}

impl Default for SqlDdlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DdlParser for SqlDdlParser {
    fn parse_constraints(&self, create_table_sql: &str) -> Result<Vec<Constraint>> {
        let statements = Parser::parse_sql(&self.dialect, create_table_sql)
            .map_err(|e| CrateError::DdlParse(e.to_string()))?;

        let Some(Statement::CreateTable(create)) = statements.into_iter().next() else {
            return Err(CrateError::DdlParse(
                "expected a single CREATE TABLE statement".to_string(),
            ));
        };

        let mut primary_key = Vec::new();
        let mut uniques = Vec::new();
        let mut keys = Vec::new();

        for column in &create.columns {
            let name = column.name.value.clone();
            for option_def in &column.options {
                match &option_def.option {
                    ColumnOption::Unique { is_primary, .. } => {
                        if *is_primary {
                            primary_key.push(name.clone());
                        } else {
                            uniques.push(vec![name.clone()]);
                        }
                    }
                    _ => {}
                }
            }
        }

        if primary_key.is_empty() && !create.columns.is_empty() {
            // No explicit PK option found; fall back to treating the first
            // declared column as the key the warm-up path ranges over.
            keys.push(vec![create.columns[0].name.value.clone()]);
        }

        let mut constraints = Vec::new();
        if !primary_key.is_empty() {
            constraints.push(Constraint {
                kind: IndexKind::PrimaryKey,
                columns: primary_key,
            });
        }
        for columns in uniques {
            constraints.push(Constraint {
                kind: IndexKind::UniqueKey,
                columns,
            });
        }
        for columns in keys {
            constraints.push(Constraint {
                kind: IndexKind::Key,
                columns,
            });
        }

        Ok(constraints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_primary_key_column() {
        let parser = SqlDdlParser::new();
        let constraints = parser
            .parse_constraints("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(255))")
            .unwrap();
        assert!(constraints
            .iter()
            .any(|c| c.kind == IndexKind::PrimaryKey && c.columns == vec!["id".to_string()]));
    }
}
