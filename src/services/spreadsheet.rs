use std::collections::BTreeSet;

use anyhow::Context;
use rust_xlsxwriter::{Format, Workbook};

use crate::grading::model::Report;

pub(crate) const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// One row per student, one column per test name seen anywhere in the report, then a total.
pub(crate) fn marks_workbook(report: &Report) -> anyhow::Result<Vec<u8>> {
    let tests: BTreeSet<&str> =
        report.values().flat_map(|details| details.mark.keys().map(String::as_str)).collect();

    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Marks").context("Failed to name worksheet")?;

    worksheet.write_string_with_format(0, 0, "Email", &bold)?;
    for (index, test) in tests.iter().enumerate() {
        worksheet.write_string_with_format(0, column(index + 1)?, *test, &bold)?;
    }
    let total_column = column(tests.len() + 1)?;
    worksheet.write_string_with_format(0, total_column, "Total", &bold)?;

    for (row_index, (email, details)) in report.iter().enumerate() {
        let row = u32::try_from(row_index + 1).context("Too many students for one worksheet")?;
        worksheet.write_string(row, 0, email)?;
        for (index, test) in tests.iter().enumerate() {
            if let Some(mark) = details.mark.get(*test) {
                worksheet.write_number(row, column(index + 1)?, f64::from(*mark))?;
            }
        }
        worksheet.write_number(row, total_column, details.total() as f64)?;
    }

    workbook.save_to_buffer().context("Failed to encode workbook")
}

fn column(index: usize) -> anyhow::Result<u16> {
    u16::try_from(index).context("Too many tests for one worksheet")
}
