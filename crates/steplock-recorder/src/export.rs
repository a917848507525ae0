//! Spreadsheet template export
//!
//! One-way: a `Variables` sheet and a `Steps` sheet for people who maintain
//! input data outside the tool. Nothing reads these files back.

use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

use steplock_core::{Error, Result};

use crate::project::{Direction, Project, VariableKind};

const VARIABLE_HEADERS: [&str; 6] = ["Key", "Kind", "Direction", "Value", "PromptOnRun", "DefaultValue"];
const STEP_HEADERS: [&str; 5] = ["Index", "Kind", "Label", "Enabled", "Payload"];
const MAX_COLUMN_WIDTH: usize = 60;

/// Build the workbook in memory
pub fn template(project: &Project) -> Result<Vec<u8>> {
    build(project).map_err(Error::export_failed)
}

fn build(project: &Project) -> std::result::Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let rows: Vec<Vec<String>> = project
        .variables
        .iter()
        .map(|v| {
            vec![
                v.key.clone(),
                kind_name(v.kind).to_string(),
                match v.direction {
                    Direction::Input => "input",
                    Direction::Output => "output",
                }
                .to_string(),
                v.display_value(),
                if v.prompt_on_run { "Y" } else { "N" }.to_string(),
                v.default_value.clone().unwrap_or_default(),
            ]
        })
        .collect();
    let sheet = workbook.add_worksheet().set_name("Variables")?;
    write_table(sheet, &VARIABLE_HEADERS, &rows, &header)?;

    let rows: Vec<Vec<String>> = project
        .steps
        .iter()
        .map(|s| {
            vec![
                s.index.to_string(),
                s.action.kind_name().to_string(),
                s.label.clone(),
                if s.enabled { "Y" } else { "N" }.to_string(),
                s.action.payload_summary(),
            ]
        })
        .collect();
    let sheet = workbook.add_worksheet().set_name("Steps")?;
    write_table(sheet, &STEP_HEADERS, &rows, &header)?;

    workbook.save_to_buffer()
}

fn write_table(
    sheet: &mut Worksheet,
    headers: &[&str],
    rows: &[Vec<String>],
    header: &Format,
) -> std::result::Result<(), XlsxError> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    for (col, title) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, header)?;
    }
    for (r, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet.write_string(r as u32 + 1, col as u16, value)?;
            if let Some(w) = widths.get_mut(col) {
                *w = (*w).max(value.chars().count());
            }
        }
    }
    for (col, width) in widths.into_iter().enumerate() {
        sheet.set_column_width(col as u16, (width + 2).min(MAX_COLUMN_WIDTH) as f64)?;
    }
    sheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn kind_name(kind: VariableKind) -> &'static str {
    match kind {
        VariableKind::Text => "text",
        VariableKind::Secret => "secret",
        VariableKind::Number => "number",
        VariableKind::Date => "date",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Variable;
    use crate::step::StepAction;
    use std::io::{Cursor, Read};
    use steplock_core::Key;

    /// One XML part of the workbook archive
    fn part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut xml = String::new();
        archive.by_name(name).unwrap().read_to_string(&mut xml).unwrap();
        xml
    }

    #[test]
    fn variables_and_steps_get_their_own_sheets() {
        let mut p = Project::new("export");
        let mut secret = Variable::input("password", "hunter2");
        secret.kind = VariableKind::Secret;
        p.set_variable(secret);
        p.set_variable(Variable::output("invoice"));
        p.steps.append(StepAction::KeyPress { key: Key::Enter }).unwrap();

        let bytes = template(&p).unwrap();
        assert!(bytes.starts_with(b"PK"));

        let workbook = part(&bytes, "xl/workbook.xml");
        let variables = workbook.find(r#"name="Variables""#).expect("Variables sheet");
        let steps = workbook.find(r#"name="Steps""#).expect("Steps sheet");
        assert!(variables < steps);

        let strings = part(&bytes, "xl/sharedStrings.xml");
        for text in VARIABLE_HEADERS.iter().chain(STEP_HEADERS.iter()) {
            assert!(strings.contains(&format!("<t>{}</t>", text)), "missing header {}", text);
        }
        for text in ["password", "secret", "********", "invoice", "output", "Press ENTER", "ENTER"] {
            assert!(strings.contains(&format!("<t>{}</t>", text)), "missing cell {}", text);
        }
        assert!(!strings.contains("hunter2"));

        // Header plus one row per variable, header plus one row per step
        let sheet1 = part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet1.contains(r#"<row r="3""#) && !sheet1.contains(r#"<row r="4""#));
        let sheet2 = part(&bytes, "xl/worksheets/sheet2.xml");
        assert!(sheet2.contains(r#"<row r="2""#) && !sheet2.contains(r#"<row r="3""#));
    }

    #[test]
    fn empty_project_exports_headers_only() {
        let bytes = template(&Project::new("empty")).unwrap();
        let sheet2 = part(&bytes, "xl/worksheets/sheet2.xml");
        assert!(sheet2.contains(r#"<row r="1""#));
        assert!(!sheet2.contains(r#"<row r="2""#));
        assert!(part(&bytes, "xl/sharedStrings.xml").contains("<t>Payload</t>"));
    }
}
