//! Schema setup for the SQLite database shared by both stores.

use sqlx::SqlitePool;
use tracing::debug;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Split a schema script into statements, dropping `--` comment lines so a
/// `;` inside a comment never starts a statement.
fn statements(script: &str) -> Vec<String> {
    let code = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    code.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply the embedded schema. Statements are idempotent, so this is safe to
/// run on every start.
pub async fn apply(db: &SqlitePool) -> sqlx::Result<usize> {
    let statements = statements(INIT_SQL);

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn comments_are_not_split_into_statements() {
        let script = "-- first; second\nCREATE TABLE a (x INTEGER);\n-- trailing;\nCREATE TABLE b (y INTEGER);\n";
        assert_eq!(
            statements(script),
            vec!["CREATE TABLE a (x INTEGER)", "CREATE TABLE b (y INTEGER)"]
        );
    }

    #[tokio::test]
    async fn schema_applies_and_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        assert_eq!(apply(&pool).await.unwrap(), 3);
        assert_eq!(apply(&pool).await.unwrap(), 3);

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, ["notes", "objects"]);
    }
}
