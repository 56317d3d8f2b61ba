//! Markdown rendering of report data through the embedded templates.
//! Pure functions, no I/O.

use chrono::{DateTime, Utc};
use minijinja::{context, Environment};
use serde::Serialize;

use crate::db::report_repo::{DepartmentHires, QuarterlyHires};
use crate::task::ReportType;

const QUARTERLY_TEMPLATE: &str = include_str!("../../templates/type1.md");
const ABOVE_MEAN_TEMPLATE: &str = include_str!("../../templates/type2.md");

fn template_name(report_type: ReportType) -> &'static str {
    match report_type {
        ReportType::Type1 => "type1.md",
        ReportType::Type2 => "type2.md",
    }
}

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_filter("cell", escape_cell);
    env.add_template(template_name(ReportType::Type1), QUARTERLY_TEMPLATE)?;
    env.add_template(template_name(ReportType::Type2), ABOVE_MEAN_TEMPLATE)?;
    Ok(env)
}

/// Keeps a value inside its Markdown table cell.
fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

fn render<T: Serialize>(
    report_type: ReportType,
    report_name: &str,
    created_at: DateTime<Utc>,
    data: &[T],
) -> Result<String, minijinja::Error> {
    let env = environment()?;
    let template = env.get_template(template_name(report_type))?;
    template.render(context! {
        report_name => report_name,
        creation_date => created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        data => data,
    })
}

pub fn render_quarterly(
    title: &str,
    created_at: DateTime<Utc>,
    data: &[QuarterlyHires],
) -> Result<String, minijinja::Error> {
    render(ReportType::Type1, title, created_at, data)
}

pub fn render_above_mean(
    title: &str,
    created_at: DateTime<Utc>,
    data: &[DepartmentHires],
) -> Result<String, minijinja::Error> {
    render(ReportType::Type2, title, created_at, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EMPTY_NOTICE: &str = "_No hires recorded for this period._";

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 15, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_quarterly_document() {
        let doc = render_quarterly(
            "Hiring",
            created(),
            &[QuarterlyHires {
                department: "Sales".into(),
                job: "Manager".into(),
                q1: 1,
                q2: 0,
                q3: 2,
                q4: 0,
            }],
        )
        .unwrap();

        let expected = "# Hiring\n\
                        \n\
                        Creation date: 2022-01-15 08:30:00\n\
                        \n\
                        | Department | Job | Q1 | Q2 | Q3 | Q4 |\n\
                        | --- | --- | --- | --- | --- | --- |\n\
                        | Sales | Manager | 1 | 0 | 2 | 0 |\n";
        assert_eq!(doc, expected);
    }

    #[test]
    fn test_above_mean_document_lists_rows_in_order() {
        let doc = render_above_mean(
            "Above",
            created(),
            &[
                DepartmentHires {
                    id: 4,
                    department: "Sales".into(),
                    hired: 12,
                },
                DepartmentHires {
                    id: 1,
                    department: "Ops".into(),
                    hired: 9,
                },
            ],
        )
        .unwrap();
        assert!(doc.starts_with("# Above\n\nCreation date: 2022-01-15 08:30:00\n"));
        assert!(doc.ends_with(
            "| Id | Department | Hired |\n\
             | --- | --- | --- |\n\
             | 4 | Sales | 12 |\n\
             | 1 | Ops | 9 |\n"
        ));
        assert!(!doc.contains(EMPTY_NOTICE));
    }

    #[test]
    fn test_empty_report_has_notice() {
        let doc = render_above_mean("Above", created(), &[]).unwrap();
        assert!(doc.contains("| Id | Department | Hired |"));
        assert!(doc.ends_with(&format!("| --- | --- | --- |\n\n{}\n", EMPTY_NOTICE)));
    }

    #[test]
    fn test_pipes_in_cells_are_escaped() {
        let doc = render_above_mean(
            "Above",
            created(),
            &[DepartmentHires {
                id: 1,
                department: "R|D".into(),
                hired: 3,
            }],
        )
        .unwrap();
        assert!(doc.contains("| 1 | R\\|D | 3 |"));
    }

    #[test]
    fn test_markup_in_names_is_not_html_escaped() {
        let doc = render_quarterly(
            "R&D <2021>",
            created(),
            &[QuarterlyHires {
                department: "R&D".into(),
                job: "<Lead>".into(),
                q1: 0,
                q2: 1,
                q3: 0,
                q4: 0,
            }],
        )
        .unwrap();
        assert!(doc.starts_with("# R&D <2021>\n"));
        assert!(doc.contains("| R&D | <Lead> | 0 | 1 | 0 | 0 |"));
    }
}
