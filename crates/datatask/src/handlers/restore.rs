//! RESTORE: reinsert a table from its latest backup.
//!
//! A missing backup fails the task. Rows are inserted as stored, in one
//! transaction; an id that already exists fails the whole restore and
//! leaves the table unchanged.

use serde_json::{json, Value};
use tracing::info;

use super::HandlerContext;
use crate::columnar::{backup_key, ColumnarBatch};
use crate::db::entity_repo;
use crate::task::{TablePayload, TaskError};

pub fn run(payload: &TablePayload, ctx: &HandlerContext<'_>) -> Result<Value, TaskError> {
    let table = payload.table_name;
    let failed = |reason: String| TaskError::RestoreFailed { table, reason };

    let key = backup_key(table);
    let bytes = ctx
        .store
        .get(&key)
        .map_err(|e| failed(e.to_string()))?
        .ok_or_else(|| TaskError::BackupNotFound {
            table,
            key: key.clone(),
        })?;

    let data = ColumnarBatch::decode(&bytes)
        .and_then(|batch| batch.into_table(table))
        .map_err(|e| TaskError::Codec(e.to_string()))?;

    let restored = entity_repo::insert_table(ctx.db, &data).map_err(|e| failed(e.to_string()))?;

    info!(%table, rows = restored, key = %key, "Restore applied");
    Ok(json!({
        "message": format!("Restore for {} successful", table),
        "rows": restored,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{backup, test_support::Fixture};
    use crate::storage::ObjectStore;
    use crate::task::Table;
    use rusqlite::params;

    fn payload(table: Table) -> TablePayload {
        TablePayload { table_name: table }
    }

    #[test]
    fn test_missing_backup_fails_without_writes() {
        let fx = Fixture::new();
        let err = run(&payload(Table::Employee), &fx.ctx()).unwrap_err();
        assert!(matches!(
            err,
            TaskError::BackupNotFound {
                table: Table::Employee,
                ..
            }
        ));
        assert!(err.to_string().contains("data not found"));
        assert_eq!(entity_repo::count(&fx.db, Table::Employee).unwrap(), 0);
    }

    #[test]
    fn test_backup_then_restore_into_empty_table() {
        let source = Fixture::new();
        source
            .db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO department (id, name, created_by_task_id) VALUES (?1, ?2, 3), (?3, ?4, 3)",
                    params![1, "Sales", 2, "Ops"],
                )?;
                Ok(())
            })
            .unwrap();
        backup::run(&payload(Table::Department), &source.ctx()).unwrap();

        let target = Fixture::new();
        let bytes = source
            .store
            .get("backups/department.cols.gz")
            .unwrap()
            .unwrap();
        target.store.put("backups/department.cols.gz", &bytes).unwrap();

        let result = run(&payload(Table::Department), &target.ctx()).unwrap();
        assert_eq!(result["rows"], 2);
        assert_eq!(result["message"], "Restore for department successful");
        assert_eq!(
            entity_repo::names(&target.db, Table::Department).unwrap(),
            vec!["Ops".to_string(), "Sales".to_string()]
        );
    }

    #[test]
    fn test_restore_over_existing_rows_fails_atomically() {
        let fx = Fixture::new();
        fx.db
            .with_conn(|conn| {
                conn.execute("INSERT INTO job (id, name, created_by_task_id) VALUES (1, 'Clerk', 1), (2, 'Cook', 1)", [])?;
                Ok(())
            })
            .unwrap();
        backup::run(&payload(Table::Job), &fx.ctx()).unwrap();
        fx.db
            .with_conn(|conn| {
                conn.execute("DELETE FROM job WHERE id = 2", [])?;
                Ok(())
            })
            .unwrap();

        let err = run(&payload(Table::Job), &fx.ctx()).unwrap_err();
        assert!(matches!(err, TaskError::RestoreFailed { .. }));
        assert_eq!(entity_repo::count(&fx.db, Table::Job).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_backup_is_codec_error() {
        let fx = Fixture::new();
        fx.store.put("backups/job.cols.gz", b"not gzip").unwrap();
        let err = run(&payload(Table::Job), &fx.ctx()).unwrap_err();
        assert!(matches!(err, TaskError::Codec(_)));
    }
}
