//! `rtf list` and `rtf info`: show what would run without running it.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::types::Info;
use crate::io::discover::discover;
use crate::io::report::write_csv_row;
use crate::io::sysinfo::SystemInfo;
use crate::schedule::RunConfig;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Inputs shared by `list` and `info`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub case_dir: PathBuf,
    /// Host labels from the command line and `rtf.toml`.
    pub labels: String,
    pub pattern: String,
}

/// Discover the case tree and compute every node's will-run verdict.
pub fn list_tests(options: &ListOptions) -> Result<Vec<Info>> {
    let project = discover(&options.case_dir)
        .with_context(|| format!("load cases from {}", options.case_dir.display()))?;
    let config = RunConfig::new(&options.labels, &options.pattern, SystemInfo::probe());
    Ok(project.list(&config))
}

/// `STATE TEST LABELS` table. `coloured` highlights the state column.
pub fn render_list<W: Write>(out: &mut W, infos: &[Info], coloured: bool) -> io::Result<()> {
    let rows: Vec<[String; 3]> = infos
        .iter()
        .map(|info| {
            let state = if info.will_run { "RUN" } else { "SKIP" };
            [state.to_string(), info.name.clone(), info.label_string()]
        })
        .collect();
    let widths = column_widths(&["STATE", "TEST", "LABELS"], &rows);

    write_row(out, &widths, &["STATE", "TEST", "LABELS"], None)?;
    for (info, row) in infos.iter().zip(&rows) {
        let colour = coloured.then_some(if info.will_run { GREEN } else { YELLOW });
        write_row(out, &widths, row, colour)?;
    }
    Ok(())
}

/// `NAME DESCRIPTION` table.
pub fn render_info<W: Write>(out: &mut W, infos: &[Info]) -> io::Result<()> {
    let rows: Vec<[String; 2]> = infos
        .iter()
        .map(|info| [info.name.clone(), info.summary.clone()])
        .collect();
    let widths = column_widths(&["NAME", "DESCRIPTION"], &rows);
    write_row(out, &widths, &["NAME", "DESCRIPTION"], None)?;
    for row in &rows {
        write_row(out, &widths, row, None)?;
    }
    Ok(())
}

/// `Name,Description,Known issues` CSV.
pub fn render_info_csv<W: Write>(out: &mut W, infos: &[Info]) -> io::Result<()> {
    write_csv_row(out, &["Name", "Description", "Known issues"])?;
    for info in infos {
        write_csv_row(out, &[&info.name, &info.summary, &info.issue])?;
    }
    Ok(())
}

fn column_widths<const N: usize>(header: &[&str; N], rows: &[[String; N]]) -> [usize; N] {
    let mut widths = [0; N];
    for (width, title) in widths.iter_mut().zip(header) {
        *width = title.len();
    }
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    widths
}

/// Cells padded to `widths` and separated by two spaces. Only the first cell
/// is coloured so padding stays aligned.
fn write_row<W: Write, S: AsRef<str>, const N: usize>(
    out: &mut W,
    widths: &[usize; N],
    cells: &[S; N],
    first_colour: Option<&str>,
) -> io::Result<()> {
    let mut line = String::new();
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        let cell = cell.as_ref();
        let last = i + 1 == N;
        let padding = if last {
            String::new()
        } else {
            " ".repeat(width.saturating_sub(cell.chars().count()) + 2)
        };
        match first_colour {
            Some(colour) if i == 0 => line.push_str(&format!("{colour}{cell}{RESET}{padding}")),
            _ => line.push_str(&format!("{cell}{padding}")),
        }
    }
    writeln!(out, "{}", line.trim_end())
}
