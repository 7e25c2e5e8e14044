use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use parquet::basic::{Compression, LogicalType, Type as PhysicalType};
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::Field;
use parquet::schema::parser::parse_message_type;

use crate::error::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Utf8(Vec<String>),
    Int64(Vec<Option<i64>>),
    /// Nulls read back as NaN.
    Float64(Vec<f64>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Utf8(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cell_string(&self, row: usize) -> String {
        match self {
            Self::Utf8(v) => v.get(row).cloned().unwrap_or_default(),
            Self::Int64(v) => v
                .get(row)
                .copied()
                .flatten()
                .map(|x| x.to_string())
                .unwrap_or_default(),
            Self::Float64(v) => match v.get(row) {
                Some(x) if x.is_finite() => x.to_string(),
                _ => String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<Column>,
}

impl Table {
    pub fn push(&mut self, name: impl Into<String>, data: ColumnData) {
        self.columns.push(Column {
            name: name.into(),
            data,
        });
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.data)
    }

    fn check_shape(&self) -> Result<()> {
        let rows = self.num_rows();
        for col in &self.columns {
            if col.data.len() != rows {
                return Err(ForecastError::Config(format!(
                    "column {} has {} rows, expected {rows}",
                    col.name,
                    col.data.len()
                )));
            }
            if col.name.is_empty() || col.name.contains(|c: char| c.is_whitespace()) {
                return Err(ForecastError::Config(format!(
                    "column name {:?} cannot be written to parquet",
                    col.name
                )));
            }
        }
        Ok(())
    }
}

pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    table.check_shape()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
    }

    let mut message = String::from("message table {\n");
    for col in &table.columns {
        let line = match col.data {
            ColumnData::Utf8(_) => format!("  REQUIRED BYTE_ARRAY {} (UTF8);\n", col.name),
            ColumnData::Int64(_) => format!("  OPTIONAL INT64 {};\n", col.name),
            ColumnData::Float64(_) => format!("  REQUIRED DOUBLE {};\n", col.name),
        };
        message.push_str(&line);
    }
    message.push('}');

    let schema = Arc::new(parse_message_type(&message)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build(),
    );

    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp).map_err(|e| ForecastError::io(&tmp, e))?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;
    let mut row_group = writer.next_row_group()?;
    let mut columns = table.columns.iter();
    while let Some(mut col_writer) = row_group.next_column()? {
        let Some(col) = columns.next() else {
            break;
        };
        match &col.data {
            ColumnData::Utf8(values) => {
                let bytes: Vec<ByteArray> =
                    values.iter().map(|s| ByteArray::from(s.as_str())).collect();
                col_writer
                    .typed::<ByteArrayType>()
                    .write_batch(&bytes, None, None)?;
            }
            ColumnData::Int64(values) => {
                let defs: Vec<i16> = values.iter().map(|v| i16::from(v.is_some())).collect();
                let present: Vec<i64> = values.iter().flatten().copied().collect();
                col_writer
                    .typed::<Int64Type>()
                    .write_batch(&present, Some(&defs), None)?;
            }
            ColumnData::Float64(values) => {
                col_writer
                    .typed::<DoubleType>()
                    .write_batch(values, None, None)?;
            }
        }
        col_writer.close()?;
    }
    row_group.close()?;
    writer.close()?;

    fs::rename(&tmp, path).map_err(|e| ForecastError::io(path, e))?;
    Ok(())
}

/// Reads a flat parquet file. Floating columns become `Float64`, plain
/// integers `Int64`, everything else (strings, dates, timestamps) `Utf8`.
pub fn read_table(path: &Path) -> Result<Table> {
    let file = File::open(path).map_err(|e| ForecastError::io(path, e))?;
    let reader = SerializedFileReader::new(file)?;
    let descr = reader.metadata().file_metadata().schema_descr_ptr();

    let mut table = Table::default();
    for idx in 0..descr.num_columns() {
        let col = descr.column(idx);
        let data = match (col.physical_type(), col.logical_type()) {
            (PhysicalType::DOUBLE | PhysicalType::FLOAT, _) => ColumnData::Float64(Vec::new()),
            (PhysicalType::INT32 | PhysicalType::INT64, None)
            | (PhysicalType::INT32 | PhysicalType::INT64, Some(LogicalType::Integer { .. })) => {
                ColumnData::Int64(Vec::new())
            }
            _ => ColumnData::Utf8(Vec::new()),
        };
        table.push(col.name(), data);
    }

    for row in reader.get_row_iter(None)? {
        let row = row?;
        for (idx, (_, field)) in row.get_column_iter().enumerate() {
            let Some(col) = table.columns.get_mut(idx) else {
                break;
            };
            match &mut col.data {
                ColumnData::Utf8(values) => values.push(field_to_string(field)),
                ColumnData::Int64(values) => values.push(field_to_i64(field)),
                ColumnData::Float64(values) => values.push(field_to_f64(field)),
            }
        }
    }

    Ok(table)
}

fn field_to_string(field: &Field) -> String {
    match field {
        Field::Null => String::new(),
        Field::Str(s) => s.clone(),
        Field::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::days(i64::from(*days))))
            .map(|d| d.to_string())
            .unwrap_or_default(),
        Field::TimestampMillis(ms) => DateTime::from_timestamp_millis(*ms)
            .map(|dt| dt.naive_utc().to_string())
            .unwrap_or_default(),
        Field::TimestampMicros(us) => DateTime::from_timestamp_micros(*us)
            .map(|dt| dt.naive_utc().to_string())
            .unwrap_or_default(),
        other => other.to_string(),
    }
}

fn field_to_i64(field: &Field) -> Option<i64> {
    match field {
        Field::Byte(v) => Some(i64::from(*v)),
        Field::Short(v) => Some(i64::from(*v)),
        Field::Int(v) => Some(i64::from(*v)),
        Field::Long(v) => Some(*v),
        Field::UByte(v) => Some(i64::from(*v)),
        Field::UShort(v) => Some(i64::from(*v)),
        Field::UInt(v) => Some(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn field_to_f64(field: &Field) -> f64 {
    match field {
        Field::Double(v) => *v,
        Field::Float(v) => f64::from(*v),
        other => field_to_i64(other).map(|v| v as f64).unwrap_or(f64::NAN),
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnData, Table, read_table, write_table};

    #[test]
    fn mixed_columns_survive_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");

        let mut table = Table::default();
        table.push(
            "date",
            ColumnData::Utf8(vec!["2024-01-01".into(), "2024-01-08".into()]),
        );
        table.push("home_goals", ColumnData::Int64(vec![Some(2), None]));
        table.push("elo_diff", ColumnData::Float64(vec![12.5, -3.0]));
        write_table(&path, &table).unwrap();

        let back = read_table(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.column("home_goals").unwrap().cell_string(1), "");
        assert!(!dir.path().join("t.parquet.tmp").exists());
    }

    #[test]
    fn ragged_table_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = Table::default();
        table.push("a", ColumnData::Float64(vec![1.0]));
        table.push("b", ColumnData::Float64(vec![]));
        assert!(write_table(&dir.path().join("x.parquet"), &table).is_err());
    }
}
