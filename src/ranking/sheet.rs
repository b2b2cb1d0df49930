use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::domain::{Ranking, RankingItem};

/// One parsed row of a rank import sheet.
///
/// Only student id, name, and rank are required; the export sheet carries
/// more columns but the import path ignores them so a round-trip works.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RankRow {
    #[serde(rename = "Student ID", alias = "student_id", alias = "學號")]
    pub student_id: String,
    #[serde(rename = "Name", alias = "student_name", alias = "姓名", default)]
    pub student_name: String,
    #[serde(rename = "Rank", alias = "rank_position", alias = "排名")]
    pub rank_position: u32,
}

/// One exported row, column order matching the review spreadsheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Rank")]
    pub rank_position: u32,
    #[serde(rename = "Student ID")]
    pub student_id: String,
    #[serde(rename = "Name")]
    pub student_name: String,
    #[serde(rename = "College")]
    pub college: String,
    #[serde(rename = "Department")]
    pub department: String,
    #[serde(rename = "Eligible Sub-types")]
    pub eligible_subtypes: String,
    #[serde(rename = "Status")]
    pub status: String,
}

impl ExportRow {
    fn from_item(item: &RankingItem) -> Self {
        let application = &item.application;
        Self {
            rank_position: item.rank_position,
            student_id: application.student_id.clone(),
            student_name: application.student_name.clone(),
            college: application.academy_name.clone(),
            department: application.department_name.clone(),
            eligible_subtypes: application
                .eligible_subtypes
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
            status: application.status.label().to_string(),
        }
    }
}

/// Raised when the sheet cannot be read at all. Row-level validation against
/// the ranking happens later, in the service.
#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("failed to read sheet: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write sheet: {0}")]
    Io(#[from] std::io::Error),
    #[error("sheet row {row}: {detail}")]
    Row { row: usize, detail: String },
}

impl SheetError {
    pub const fn code(&self) -> &'static str {
        match self {
            SheetError::Csv(_) => "SHEET_UNREADABLE",
            SheetError::Io(_) => "SHEET_IO",
            SheetError::Row { .. } => "SHEET_ROW_INVALID",
        }
    }
}

/// Parse a rank import sheet, trimming whitespace the way exported files
/// tend to accumulate it.
pub fn parse_rank_rows<R: Read>(reader: R) -> Result<Vec<RankRow>, SheetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<RankRow>().enumerate() {
        let row = record.map_err(|err| SheetError::Row {
            // Header is line 1.
            row: index + 2,
            detail: err.to_string(),
        })?;
        if row.student_id.is_empty() {
            return Err(SheetError::Row {
                row: index + 2,
                detail: "student id is empty".to_string(),
            });
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Serialize a ranking to the export sheet format.
pub fn write_export<W: Write>(ranking: &Ranking, writer: W) -> Result<(), SheetError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut items: Vec<&RankingItem> = ranking.items.iter().collect();
    items.sort_by_key(|item| item.rank_position);
    for item in items {
        csv_writer.serialize(ExportRow::from_item(item))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Export to an in-memory CSV string, the form the HTTP surface returns.
pub fn export_string(ranking: &Ranking) -> Result<String, SheetError> {
    let mut buffer = Vec::new();
    write_export(ranking, &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| SheetError::Row {
        row: 0,
        detail: format!("export was not valid UTF-8: {err}"),
    })
}

/// Parse a full export-format sheet back into rows, used by the offline CLI
/// runner to rebuild a ranking snapshot from disk.
pub fn parse_export_rows<R: Read>(reader: R) -> Result<Vec<ExportRow>, SheetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<ExportRow>().enumerate() {
        rows.push(record.map_err(|err| SheetError::Row {
            row: index + 2,
            detail: err.to_string(),
        })?);
    }
    Ok(rows)
}

/// Row of a quota configuration sheet, used by the offline CLI runner.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuotaRow {
    #[serde(rename = "Sub-type", alias = "sub_type", alias = "子類別")]
    pub sub_type: String,
    #[serde(rename = "College", alias = "college", alias = "學院")]
    pub college: String,
    #[serde(rename = "Quota", alias = "quota", alias = "名額")]
    pub quota: u32,
}

pub fn parse_quota_rows<R: Read>(reader: R) -> Result<Vec<QuotaRow>, SheetError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();
    for (index, record) in csv_reader.deserialize::<QuotaRow>().enumerate() {
        rows.push(record.map_err(|err| SheetError::Row {
            row: index + 2,
            detail: err.to_string(),
        })?);
    }
    Ok(rows)
}
