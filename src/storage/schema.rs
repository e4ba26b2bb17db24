//! Database layout definitions

use crate::config::StorageConfig;
use crate::schema::DataType;
use crate::storage::sql::quote_identifier;
use crate::Result;

const ID_COLUMN: &str = "id INTEGER PRIMARY KEY AUTOINCREMENT";

/// Columns shared by every log table
const LOG_COLUMNS: &str = "timestamp TEXT NOT NULL, account_id";

fn create_table(table: &str, columns: &[String]) -> String {
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_identifier(table), columns.join(", "))
}

fn create_index(table: &str, suffix: &str, columns: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
        quote_identifier(&format!("idx_{}_{}", table, suffix)),
        quote_identifier(table),
        columns
    )
}

/// DDL for the whole layout: object, value and relation tables, log mirrors and indexes.
///
/// `inline_columns` are the object-table columns declared by the schema.
pub fn layout_statements(config: &StorageConfig, inline_columns: &[(String, DataType)]) -> Result<Vec<String>> {
    let mut statements = Vec::new();

    // ========== Object table ==========

    let mut object_columns = vec![ID_COLUMN.to_string(), "compact_class_id INTEGER NOT NULL".to_string()];
    object_columns.extend(
        inline_columns
            .iter()
            .map(|(column, data_type)| format!("{} {}", quote_identifier(column), data_type.sql_type())),
    );
    statements.push(create_table(&config.object_table, &object_columns));
    statements.push(create_index(&config.object_table, "class", "compact_class_id"));

    if config.logging {
        statements.push(create_table(
            &config.object_log_table,
            &[
                ID_COLUMN.to_string(),
                "object_id INTEGER NOT NULL".to_string(),
                "compact_class_id INTEGER NOT NULL".to_string(),
                "action TEXT NOT NULL".to_string(),
                LOG_COLUMNS.to_string(),
            ],
        ));
    }

    // ========== Value tables ==========

    for table in config.value_tables() {
        let sql_type = config.value_table_type(table).sql_type();
        statements.push(create_table(
            table,
            &[
                ID_COLUMN.to_string(),
                "object_id INTEGER NOT NULL".to_string(),
                "property_compact_id INTEGER NOT NULL".to_string(),
                format!("value {}", sql_type),
            ],
        ));
        statements.push(create_index(table, "object", "object_id, property_compact_id"));

        if config.logging {
            statements.push(create_table(
                config.value_log_table(table)?,
                &[
                    ID_COLUMN.to_string(),
                    "object_id INTEGER NOT NULL".to_string(),
                    "property_compact_id INTEGER NOT NULL".to_string(),
                    format!("value {}", sql_type),
                    "deleted INTEGER NOT NULL DEFAULT 0".to_string(),
                    LOG_COLUMNS.to_string(),
                ],
            ));
        }
    }

    // ========== Relation table ==========

    let relation_columns = [
        "subject_id INTEGER NOT NULL".to_string(),
        "object_id INTEGER NOT NULL".to_string(),
        "predicate_class_compact_id INTEGER NOT NULL".to_string(),
    ];
    let mut columns = vec![ID_COLUMN.to_string()];
    columns.extend(relation_columns.iter().cloned());
    statements.push(create_table(&config.relation_table, &columns));
    statements.push(create_index(&config.relation_table, "subject", "subject_id, predicate_class_compact_id"));
    statements.push(create_index(&config.relation_table, "object", "object_id, predicate_class_compact_id"));

    if config.logging {
        columns.push("deleted INTEGER NOT NULL DEFAULT 0".to_string());
        columns.push(LOG_COLUMNS.to_string());
        statements.push(create_table(&config.relation_log_table, &columns));
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_covers_every_table() {
        let config = StorageConfig::default();
        let statements = layout_statements(&config, &[("code".to_string(), DataType::String)]).unwrap();
        let tables: Vec<&String> = statements.iter().filter(|s| s.starts_with("CREATE TABLE")).collect();
        // objects + log, 4 value tables + 4 logs, relations + log
        assert_eq!(tables.len(), 12);
        assert!(statements[0].contains("\"code\" TEXT"));
        assert!(statements.iter().any(|s| s.contains("\"object_decimal_values\"") && s.contains("value REAL")));
    }

    #[test]
    fn test_no_value_logs_without_logging() {
        let config = StorageConfig {
            logging: false,
            ..Default::default()
        };
        let statements = layout_statements(&config, &[]).unwrap();
        assert!(!statements.iter().any(|s| s.contains("_log")));
    }
}
