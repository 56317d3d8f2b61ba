//! REPORT: aggregate hires, render the Markdown template, upload, hand back a
//! time-limited link.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use super::render;
use super::HandlerContext;
use crate::db::report_repo;
use crate::task::{ReportPayload, ReportType, TaskError};

pub const REPORT_SUCCESS: &str = "Report generated and uploaded successfully";

/// Title and object-name stem of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub title: String,
    pub output: String,
}

pub fn report_meta(report_type: ReportType, year: i32) -> ReportMeta {
    match report_type {
        ReportType::Type1 => ReportMeta {
            title: format!("Quarterly Hiring Report by Job and Department for {}", year),
            output: format!("quarterly_hiring_report_{}", year),
        },
        ReportType::Type2 => ReportMeta {
            title: format!("Departments Hiring Above Mean in {}", year),
            output: format!("departments_hiring_above_mean_{}", year),
        },
    }
}

pub fn run(payload: &ReportPayload, ctx: &HandlerContext<'_>) -> Result<Value, TaskError> {
    let meta = report_meta(payload.report_type, ctx.reference_year);
    let created_at = Utc::now();

    let (rendered, rows) = match payload.report_type {
        ReportType::Type1 => {
            let data = report_repo::hires_by_quarter(ctx.db, ctx.reference_year)?;
            (render::render_quarterly(&meta.title, created_at, &data), data.len())
        }
        ReportType::Type2 => {
            let data = report_repo::above_mean(report_repo::department_hires(
                ctx.db,
                ctx.reference_year,
            )?);
            (render::render_above_mean(&meta.title, created_at, &data), data.len())
        }
    };
    let document = rendered.map_err(|e| TaskError::ReportRenderFailed(e.to_string()))?;

    let key = format!("reports/{}-{}.md", meta.output, uuid::Uuid::new_v4());
    ctx.store
        .put(&key, document.as_bytes())
        .map_err(|e| TaskError::ReportUploadFailed(e.to_string()))?;

    let url = ctx
        .store
        .presigned_url(&key, ctx.presign_expiry)
        .map_err(|e| TaskError::ReportUrlFailed(e.to_string()))?;

    info!(report = %payload.report_type, rows, key = %key, "Report uploaded");
    Ok(json!({
        "message": REPORT_SUCCESS,
        "url": url,
        "key": key,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{Fixture, PUBLIC_URL};
    use crate::storage::{FsObjectStore, ObjectStore};
    use rusqlite::params;

    fn seed(fx: &Fixture) {
        fx.db
            .with_conn(|conn| {
                conn.execute_batch(
                    "INSERT INTO department (id, name, created_by_task_id) VALUES
                        (1, 'Sales', 1), (2, 'Eng', 1), (3, 'Ops', 1);
                     INSERT INTO job (id, name, created_by_task_id) VALUES (1, 'Clerk', 1);",
                )?;
                let mut id = 0;
                for (dept, count) in [(1, 10), (2, 2), (3, 6)] {
                    for _ in 0..count {
                        id += 1;
                        conn.execute(
                            "INSERT INTO employee (id, name, hired_at, department_id, job_id, created_by_task_id)
                             VALUES (?1, ?2, '2021-04-01T00:00:00Z', ?3, 1, 1)",
                            params![id, format!("e{}", id), dept],
                        )?;
                    }
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_type2_report_lists_only_departments_above_mean() {
        let fx = Fixture::new();
        seed(&fx);

        let result = run(
            &ReportPayload {
                report_type: ReportType::Type2,
            },
            &fx.ctx(),
        )
        .unwrap();

        assert_eq!(result["message"], REPORT_SUCCESS);
        let key = result["key"].as_str().unwrap();
        assert!(key.starts_with("reports/departments_hiring_above_mean_2021-"));
        assert!(key.ends_with(".md"));
        let url = result["url"].as_str().unwrap();
        assert!(url.starts_with(PUBLIC_URL));
        assert_eq!(fx.store.verify_presigned_url(url).unwrap().key, key);

        let document = String::from_utf8(fx.store.get(key).unwrap().unwrap()).unwrap();
        assert!(document.starts_with("# Departments Hiring Above Mean in 2021"));
        assert!(document.contains("| 1 | Sales | 10 |"));
        assert!(!document.contains("Ops"));
        assert!(!document.contains("Eng"));
    }

    #[test]
    fn test_type1_report_keys_are_unique() {
        let fx = Fixture::new();
        seed(&fx);
        let payload = ReportPayload {
            report_type: ReportType::Type1,
        };
        let first = run(&payload, &fx.ctx()).unwrap();
        let second = run(&payload, &fx.ctx()).unwrap();
        assert_ne!(first["key"], second["key"]);

        let document = String::from_utf8(
            fx.store
                .get(first["key"].as_str().unwrap())
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert!(document.contains("| Sales | Clerk | 0 | 10 | 0 | 0 |"));
    }

    #[test]
    fn test_url_failure_is_distinct_from_upload_failure() {
        let fx = Fixture::new();
        let unsigned = FsObjectStore::new(fx.dir.path(), "unsigned").unwrap();
        let ctx = HandlerContext {
            db: &fx.db,
            store: &unsigned,
            reference_year: 2021,
            presign_expiry: std::time::Duration::from_secs(60),
        };
        let err = run(
            &ReportPayload {
                report_type: ReportType::Type1,
            },
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, TaskError::ReportUrlFailed(_)));
    }

    #[test]
    fn test_report_meta_follows_reference_year() {
        let meta = report_meta(ReportType::Type1, 2023);
        assert_eq!(
            meta.title,
            "Quarterly Hiring Report by Job and Department for 2023"
        );
        assert_eq!(meta.output, "quarterly_hiring_report_2023");
    }
}
