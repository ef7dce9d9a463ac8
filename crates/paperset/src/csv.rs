//! The tabular interface: request sheets in, diff sheets out.
//!
//! Sheets are CSV with a header row. Column names are case-insensitive;
//! unknown columns pass through to the kind plugins as row fields. The
//! export side writes the same schema it reads, so a computed diff can be
//! replayed as a request sheet.

use crate::{
    batch::row::{RowSpec, truthy},
    error::InternalError,
    message::Landmark,
};
use std::collections::BTreeMap;

/// Columns the exporter always emits, in order.
pub const EXPORT_COLUMNS: [&str; 7] = [
    "action",
    "paper",
    "email",
    "reviewtype",
    "round",
    "conflict",
    "reason",
];

/// Parse a request sheet into rows. `default_file` names the sheet for
/// landmarks; an explicit `landmark` column overrides it per row.
pub fn parse_rows(input: &str, default_file: &str) -> Result<Vec<RowSpec>, InternalError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| InternalError::csv_internal(err.to_string()))?
        .iter()
        .map(str::to_ascii_lowercase)
        .collect();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| InternalError::csv_internal(err.to_string()))?;
        let mut cells: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();

        // Header is line 1; the first record is line 2.
        let line = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(2);
        let landmark = cells
            .remove("landmark")
            .filter(|v| !v.is_empty())
            .map_or_else(|| Landmark::new(default_file, line), |v| Landmark::parse(&v));

        let action = cells.remove("action").unwrap_or_default();
        let paper = cells.remove("paper").unwrap_or_default();
        let user = cells
            .remove("email")
            .or_else(|| cells.remove("user"))
            .filter(|v| !v.is_empty());
        let override_conflict = cells.remove("override").is_some_and(|v| truthy(&v));

        rows.push(RowSpec {
            landmark,
            action,
            paper,
            user,
            fields: cells,
            override_conflict,
        });
    }
    Ok(rows)
}

///
/// ExportRow
///
/// One diff row in the export schema. Absent columns stay empty.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExportRow {
    pub action: String,
    pub paper: String,
    pub email: String,
    pub reviewtype: String,
    pub round: String,
    pub conflict: String,
    pub reason: String,
}

///
/// DiffExport
///

#[derive(Debug, Default)]
pub struct DiffExport {
    rows: Vec<ExportRow>,
}

impl DiffExport {
    #[must_use]
    pub const fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn push(&mut self, row: ExportRow) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = &ExportRow> {
        self.rows.iter()
    }

    /// Render the accumulated rows as a request sheet.
    pub fn to_csv(&self) -> Result<String, InternalError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(EXPORT_COLUMNS)
            .map_err(|err| InternalError::csv_internal(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record([
                    row.action.as_str(),
                    row.paper.as_str(),
                    row.email.as_str(),
                    row.reviewtype.as_str(),
                    row.round.as_str(),
                    row.conflict.as_str(),
                    row.reason.as_str(),
                ])
                .map_err(|err| InternalError::csv_internal(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| InternalError::csv_internal(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| InternalError::csv_internal(err.to_string()))
    }
}

///
/// TESTS
///
