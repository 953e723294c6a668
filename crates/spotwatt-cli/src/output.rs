use crate::cli::OutputFormat;
use crate::commands::{CommandResult, Table};
use crate::error::CliError;

pub fn render(result: &CommandResult, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }

    match (format, &result.table) {
        (OutputFormat::Table, Some(table)) => render_table(table),
        (OutputFormat::Table, None) | (OutputFormat::Json, _) => {
            let payload = if pretty || format == OutputFormat::Table {
                serde_json::to_string_pretty(&result.data)?
            } else {
                serde_json::to_string(&result.data)?
            };
            println!("{payload}");
        }
    }

    Ok(())
}

fn render_table(table: &Table) {
    for line in table_lines(table) {
        println!("{line}");
    }
}

fn table_lines(table: &Table) -> Vec<String> {
    let mut widths: Vec<usize> = table.headers.iter().map(|header| header.len()).collect();
    for row in &table.rows {
        for (index, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(index) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let format_row = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_owned()
    };

    let mut lines = Vec::with_capacity(table.rows.len() + 2);
    lines.push(format_row(table.headers.clone()));
    lines.push(
        widths
            .iter()
            .map(|width| "-".repeat(*width))
            .collect::<Vec<_>>()
            .join("  "),
    );
    for row in &table.rows {
        lines.push(format_row(row.iter().map(String::as_str).collect()));
    }
    lines
}
