use std::fmt;

use crate::model::{InputData, OutputData};

const RULE: &str = "-------------------------------------------------------------";

/// Minimum gap between a header and its column border
const MIN_PADDING: usize = 2;

/// A single table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Cell {
    fn is_numeric(&self) -> bool {
        !matches!(self, Cell::Text(_))
    }

    fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(v) => format!("{v:.4}"),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_owned())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Int(value as i64)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::Int(value as i64)
    }
}

/// Renders rows as a psql-style text table. Columns holding only numbers are
/// right-aligned, every other column is left-aligned. Short rows are padded
/// with empty cells.
pub fn psql_table(headers: &[String], rows: &[Vec<Cell>]) -> String {
    let n_columns = rows
        .iter()
        .map(|r| r.len())
        .chain(std::iter::once(headers.len()))
        .max()
        .unwrap_or(0);

    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            (0..n_columns)
                .map(|i| row.get(i).map(Cell::render).unwrap_or_default())
                .collect()
        })
        .collect();

    let numeric: Vec<bool> = (0..n_columns)
        .map(|i| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .all(Cell::is_numeric)
        })
        .collect();

    let widths: Vec<usize> = (0..n_columns)
        .map(|i| {
            let header = headers.get(i).map_or(0, |h| h.len() + MIN_PADDING);
            rendered
                .iter()
                .map(|row| row[i].len())
                .fold(header, usize::max)
        })
        .collect();

    let border = |left: char, joint: char, right: char| -> String {
        let segments: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("{left}{}{right}", segments.join(&joint.to_string()))
    };
    let line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .zip(&numeric)
            .map(|((cell, width), right)| {
                if *right {
                    format!(" {cell:>width$} ")
                } else {
                    format!(" {cell:<width$} ")
                }
            })
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let header_cells: Vec<String> = (0..n_columns)
        .map(|i| headers.get(i).cloned().unwrap_or_default())
        .collect();

    let mut table: Vec<String> = Vec::with_capacity(rendered.len() + 4);
    table.push(border('+', '+', '+'));
    table.push(line(&header_cells));
    table.push(border('|', '+', '|'));
    for row in &rendered {
        table.push(line(row));
    }
    table.push(border('+', '+', '+'));

    table.join("\n")
}

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// `first` followed by `prefix1..prefixN`
fn numbered_headers(first: &str, prefix: &str, n: usize) -> Vec<String> {
    std::iter::once(first.to_owned())
        .chain((1..=n).map(|i| format!("{prefix}{i}")))
        .collect()
}

fn indexed_rows<T: Clone + Into<Cell>>(rows: &[Vec<T>]) -> Vec<Vec<Cell>> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            std::iter::once(Cell::from(i + 1))
                .chain(row.iter().cloned().map(Into::<Cell>::into))
                .collect()
        })
        .collect()
}

fn widest(rows: &[Vec<impl Sized>]) -> usize {
    rows.iter().map(|r| r.len()).max().unwrap_or(0)
}

/// Input parameters and, once solved, the raw results as text tables
pub struct Report<'a> {
    input_data: &'a InputData,
    output_data: &'a OutputData,
}

impl<'a> Report<'a> {
    pub fn new(input_data: &'a InputData, output_data: &'a OutputData) -> Report<'a> {
        Report {
            input_data,
            output_data,
        }
    }

    fn banner(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
        let heading = format!("-------------- {title} ");
        writeln!(f, "{RULE}")?;
        writeln!(f, "{heading}{}", "-".repeat(RULE.len().saturating_sub(heading.len())))?;
        writeln!(f, "{RULE}")?;
        writeln!(f)
    }

    fn section(f: &mut fmt::Formatter<'_>, title: &str, table: String) -> fmt::Result {
        writeln!(f, "{title}:")?;
        writeln!(f)?;
        writeln!(f, "{table}")?;
        writeln!(f)
    }

    fn write_input(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = self.input_data;

        let parameters: Vec<Vec<Cell>> = [
            ("w", input.w()),
            ("h", input.h()),
            ("t", input.t()),
            ("a", input.a()),
            ("b", input.b()),
            ("x", input.x()),
            ("y", input.y()),
        ]
        .into_iter()
        .map(|(name, value)| vec![Cell::from(name), Cell::from(value)])
        .collect();
        Self::section(
            f,
            "Model parameters",
            psql_table(&headers(&["Parameter", "Value"]), &parameters),
        )?;

        let bcs: Vec<Vec<Cell>> = input
            .bcs()
            .iter()
            .map(|(marker, value)| vec![Cell::from(*marker), Cell::from(*value)])
            .collect();
        Self::section(
            f,
            "Model boundary conditions",
            psql_table(&headers(&["Marker", "Pressure"]), &bcs),
        )?;

        let conductivity = vec![
            vec![Cell::from("lx"), Cell::from(input.lx())],
            vec![Cell::from("ly"), Cell::from(input.ly())],
        ];
        Self::section(
            f,
            "Conductivity",
            psql_table(&headers(&["Parameter", "Value"]), &conductivity),
        )
    }

    fn write_results(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = self.output_data;

        let coords: Vec<Vec<f64>> = output.coords.iter().map(|c| c.to_vec()).collect();
        Self::section(
            f,
            "Element coordinates",
            psql_table(&headers(&["Node", "x", "y"]), &indexed_rows(&coords)),
        )?;

        Self::section(
            f,
            "Element topology",
            psql_table(
                &numbered_headers("Element", "i", widest(&output.edof)),
                &indexed_rows(&output.edof),
            ),
        )?;

        Self::section(
            f,
            "Element displacements",
            psql_table(
                &numbered_headers("Element", "ed", widest(&output.ed)),
                &indexed_rows(&output.ed),
            ),
        )?;

        let a: Vec<Vec<f64>> = output.a.iter().map(|v| vec![*v]).collect();
        Self::section(
            f,
            "Displacements",
            psql_table(&headers(&["Node", "Pressure"]), &indexed_rows(&a)),
        )?;

        let r: Vec<Vec<f64>> = output.r.iter().map(|v| vec![*v]).collect();
        Self::section(
            f,
            "Reactions",
            psql_table(&headers(&["Node", "Flow"]), &indexed_rows(&r)),
        )?;

        let flows: Vec<Vec<f64>> = output.flow.iter().map(|q| vec![q[0], q[1]]).collect();
        Self::section(
            f,
            "Element flows",
            psql_table(&headers(&["Element", "qx", "qy"]), &indexed_rows(&flows)),
        )
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        Self::banner(f, "Model input")?;
        self.write_input(f)?;

        if !self.output_data.is_empty() {
            Self::banner(f, "Results")?;
            self.write_results(f)?;
        }

        Ok(())
    }
}
