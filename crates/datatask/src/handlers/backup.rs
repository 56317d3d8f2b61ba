//! BACKUP: snapshot one table into the object store.

use serde_json::{json, Value};
use tracing::info;

use super::HandlerContext;
use crate::columnar::{backup_key, ColumnarBatch};
use crate::db::entity_repo;
use crate::task::{TablePayload, TaskError};

pub fn run(payload: &TablePayload, ctx: &HandlerContext<'_>) -> Result<Value, TaskError> {
    let table = payload.table_name;
    let failed = |reason: String| TaskError::BackupFailed { table, reason };

    let data = entity_repo::fetch_table(ctx.db, table).map_err(|e| failed(e.to_string()))?;
    let bytes = ColumnarBatch::from_table(&data)
        .and_then(|batch| batch.encode())
        .map_err(|e| failed(e.to_string()))?;

    let key = backup_key(table);
    ctx.store
        .put(&key, &bytes)
        .map_err(|e| failed(e.to_string()))?;

    info!(%table, rows = data.rows.len(), bytes = bytes.len(), key = %key, "Backup written");
    Ok(json!({
        "message": format!("Backup for {} successful", table),
        "key": key,
        "rows": data.rows.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::Fixture;
    use crate::storage::ObjectStore;
    use crate::task::Table;
    use rusqlite::params;

    #[test]
    fn test_backup_writes_deterministic_key() {
        let fx = Fixture::new();
        fx.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO department (id, name, created_by_task_id) VALUES (?1, ?2, 1), (?3, ?4, 1)",
                    params![1, "Sales", 2, "Ops"],
                )?;
                Ok(())
            })
            .unwrap();

        let payload = TablePayload {
            table_name: Table::Department,
        };
        let result = run(&payload, &fx.ctx()).unwrap();

        assert_eq!(result["message"], "Backup for department successful");
        assert_eq!(result["key"], "backups/department.cols.gz");
        assert_eq!(result["rows"], 2);

        let stored = fx.store.get("backups/department.cols.gz").unwrap().unwrap();
        let batch = ColumnarBatch::decode(&stored).unwrap();
        assert_eq!(batch.row_count, 2);
    }

    #[test]
    fn test_empty_table_still_backed_up() {
        let fx = Fixture::new();
        let payload = TablePayload {
            table_name: Table::Job,
        };
        let result = run(&payload, &fx.ctx()).unwrap();
        assert_eq!(result["rows"], 0);
        assert!(fx.store.get("backups/job.cols.gz").unwrap().is_some());
    }

    #[test]
    fn test_second_backup_overwrites_first() {
        let fx = Fixture::new();
        let payload = TablePayload {
            table_name: Table::Job,
        };
        run(&payload, &fx.ctx()).unwrap();
        fx.db
            .with_conn(|conn| {
                conn.execute("INSERT INTO job (id, name, created_by_task_id) VALUES (1, 'Clerk', 1)", [])?;
                Ok(())
            })
            .unwrap();
        run(&payload, &fx.ctx()).unwrap();

        let stored = fx.store.get("backups/job.cols.gz").unwrap().unwrap();
        assert_eq!(ColumnarBatch::decode(&stored).unwrap().row_count, 1);
    }

    #[test]
    fn test_unencodable_rows_fail_backup_without_writing() {
        let fx = Fixture::new();
        fx.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO job (id, name, created_by_task_id) VALUES (1, X'00FF', 1)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let err = run(
            &TablePayload {
                table_name: Table::Job,
            },
            &fx.ctx(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TaskError::BackupFailed {
                table: Table::Job,
                ..
            }
        ));
        assert!(err.to_string().contains("expected text"));
        assert!(fx.store.get("backups/job.cols.gz").unwrap().is_none());
    }
}
