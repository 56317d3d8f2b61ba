//! Read-only hiring aggregates backing the reports.

use rusqlite::params;
use serde::Serialize;

use super::{Database, DatabaseError};

/// Hires for one department/job pair, split by calendar quarter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarterlyHires {
    pub department: String,
    pub job: String,
    #[serde(rename = "Q1")]
    pub q1: u64,
    #[serde(rename = "Q2")]
    pub q2: u64,
    #[serde(rename = "Q3")]
    pub q3: u64,
    #[serde(rename = "Q4")]
    pub q4: u64,
}

/// Total hires of one department in a year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentHires {
    pub id: i64,
    pub department: String,
    pub hired: u64,
}

fn year_param(year: i32) -> String {
    format!("{:04}", year)
}

/// Hires per department and job for `year`, ordered by department then job.
///
/// Pairs without any hire in `year` are absent.
pub fn hires_by_quarter(db: &Database, year: i32) -> Result<Vec<QuarterlyHires>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT d.name, j.name,
                SUM(CASE WHEN CAST(strftime('%m', e.hired_at) AS INTEGER) BETWEEN 1 AND 3 THEN 1 ELSE 0 END),
                SUM(CASE WHEN CAST(strftime('%m', e.hired_at) AS INTEGER) BETWEEN 4 AND 6 THEN 1 ELSE 0 END),
                SUM(CASE WHEN CAST(strftime('%m', e.hired_at) AS INTEGER) BETWEEN 7 AND 9 THEN 1 ELSE 0 END),
                SUM(CASE WHEN CAST(strftime('%m', e.hired_at) AS INTEGER) BETWEEN 10 AND 12 THEN 1 ELSE 0 END)
             FROM employee e
             JOIN department d ON d.id = e.department_id
             JOIN job j ON j.id = e.job_id
             WHERE strftime('%Y', e.hired_at) = ?1
             GROUP BY d.name, j.name
             ORDER BY d.name, j.name",
        )?;
        let rows = stmt
            .query_map(params![year_param(year)], |row| {
                Ok(QuarterlyHires {
                    department: row.get(0)?,
                    job: row.get(1)?,
                    q1: row.get(2)?,
                    q2: row.get(3)?,
                    q3: row.get(4)?,
                    q4: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Hire count per department for `year`. Departments with no hires in
/// `year` are absent.
pub fn department_hires(db: &Database, year: i32) -> Result<Vec<DepartmentHires>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT d.id, d.name, COUNT(e.id)
             FROM department d
             JOIN employee e ON e.department_id = d.id
             WHERE strftime('%Y', e.hired_at) = ?1
             GROUP BY d.id, d.name",
        )?;
        let rows = stmt
            .query_map(params![year_param(year)], |row| {
                Ok(DepartmentHires {
                    id: row.get(0)?,
                    department: row.get(1)?,
                    hired: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Keeps departments whose count is strictly greater than the mean, most
/// hires first.
pub fn above_mean(rows: Vec<DepartmentHires>) -> Vec<DepartmentHires> {
    if rows.is_empty() {
        return rows;
    }
    let total: u64 = rows.iter().map(|r| r.hired).sum();
    let mean = total as f64 / rows.len() as f64;

    let mut above: Vec<_> = rows.into_iter().filter(|r| r.hired as f64 > mean).collect();
    above.sort_by(|a, b| {
        b.hired
            .cmp(&a.hired)
            .then_with(|| a.department.cmp(&b.department))
    });
    above
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hires(id: i64, department: &str, hired: u64) -> DepartmentHires {
        DepartmentHires {
            id,
            department: department.to_string(),
            hired,
        }
    }

    fn seed(db: &Database) {
        db.with_conn(|conn| {
            conn.execute_batch(
                "INSERT INTO department (id, name, created_by_task_id) VALUES
                    (1, 'Sales', 0), (2, 'Eng', 0), (3, 'Idle', 0);
                 INSERT INTO job (id, name, created_by_task_id) VALUES
                    (1, 'Manager', 0), (2, 'Clerk', 0);
                 INSERT INTO employee (id, name, hired_at, department_id, job_id, created_by_task_id) VALUES
                    (1, 'a', '2021-01-15T09:00:00Z', 1, 1, 0),
                    (2, 'b', '2021-02-15T09:00:00Z', 1, 1, 0),
                    (3, 'c', '2021-05-15T09:00:00Z', 1, 2, 0),
                    (4, 'd', '2021-12-31T23:59:59Z', 2, 2, 0),
                    (5, 'e', '2020-06-01T00:00:00Z', 2, 2, 0),
                    (6, 'f', '2022-01-01T00:00:00Z', 3, 1, 0);",
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_hires_by_quarter() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let rows = hires_by_quarter(&db, 2021).unwrap();
        assert_eq!(
            rows,
            vec![
                QuarterlyHires {
                    department: "Eng".into(),
                    job: "Clerk".into(),
                    q1: 0,
                    q2: 0,
                    q3: 0,
                    q4: 1
                },
                QuarterlyHires {
                    department: "Sales".into(),
                    job: "Clerk".into(),
                    q1: 0,
                    q2: 1,
                    q3: 0,
                    q4: 0
                },
                QuarterlyHires {
                    department: "Sales".into(),
                    job: "Manager".into(),
                    q1: 2,
                    q2: 0,
                    q3: 0,
                    q4: 0
                },
            ]
        );
    }

    #[test]
    fn test_department_hires_excludes_other_years() {
        let db = Database::open_in_memory().unwrap();
        seed(&db);

        let mut rows = department_hires(&db, 2021).unwrap();
        rows.sort_by_key(|r| r.id);
        assert_eq!(rows, vec![hires(1, "Sales", 3), hires(2, "Eng", 1)]);
    }

    #[test]
    fn test_above_mean_is_strict() {
        let rows = vec![hires(1, "Sales", 10), hires(2, "Eng", 2), hires(3, "Ops", 6)];
        assert_eq!(above_mean(rows), vec![hires(1, "Sales", 10)]);
    }

    #[test]
    fn test_above_mean_sorted_descending() {
        let rows = vec![
            hires(1, "A", 5),
            hires(2, "B", 9),
            hires(3, "C", 1),
            hires(4, "D", 7),
        ];
        let names: Vec<_> = above_mean(rows).into_iter().map(|r| r.department).collect();
        assert_eq!(names, vec!["B", "D"]);
    }

    #[test]
    fn test_above_mean_edge_cases() {
        assert!(above_mean(Vec::new()).is_empty());
        assert!(above_mean(vec![hires(1, "Solo", 4)]).is_empty());
        assert!(above_mean(vec![hires(1, "A", 3), hires(2, "B", 3)]).is_empty());
    }
}
