// Conversion of query results into Arrow record batches
use crate::error::{Error, Result};
use crate::models::{QueryResult, TableFieldSchema};
use arrow_array::builder::{BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder};
use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use chrono::NaiveDate;
use diagnostics::*;
use std::sync::Arc;

pub const LAT: &str = "Lat";
pub const LON: &str = "Lon";
pub const DATE: &str = "Date";
pub const TIME: &str = "Time";

/// Columns identifying one observation
pub const KEY_COLUMNS: [&str; 4] = [LAT, LON, DATE, TIME];

/// One pollutant's query result as an Arrow table
#[derive(Debug, Clone)]
pub struct PollutantTable {
    pub pollutant: String,
    pub batch: RecordBatch,
}

impl PollutantTable {
    /// Build from a paged query result
    pub fn from_result(pollutant: &str, result: &QueryResult) -> Result<Self> {
        let batch = result_to_batch(result)?;
        let table = Self {
            pollutant: pollutant.to_string(),
            batch,
        };
        table.value_index()?;
        Ok(table)
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Index of the measurement column (named after the pollutant)
    pub fn value_index(&self) -> Result<usize> {
        self.batch
            .schema()
            .index_of(&self.pollutant)
            .map_err(|_| {
                Error::Decode(format!(
                    "result for '{}' has no column named after the pollutant",
                    self.pollutant
                ))
            })
    }
}

/// Map a BigQuery column type onto an Arrow type
#[must_use]
pub fn arrow_type(field_type: &str) -> DataType {
    match field_type.to_ascii_uppercase().as_str() {
        "FLOAT" | "FLOAT64" => DataType::Float64,
        "INTEGER" | "INT64" => DataType::Int64,
        "BOOLEAN" | "BOOL" => DataType::Boolean,
        "DATE" => DataType::Date32,
        _ => DataType::Utf8,
    }
}

/// Arrow schema matching a BigQuery result schema; every column nullable
#[must_use]
pub fn arrow_schema(fields: &[TableFieldSchema]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|f| Field::new(&f.name, arrow_type(&f.field_type), true))
            .collect::<Vec<_>>(),
    )
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as i32
}

fn parse_cell<T: std::str::FromStr>(column: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| Error::Decode(format!("column {column}: cannot parse '{value}': {e}")))
}

fn build_column(index: usize, name: &str, data_type: &DataType, result: &QueryResult) -> Result<ArrayRef> {
    let cells = result.rows.iter().map(|row| row.get(index).and_then(|c| c.as_deref()));
    let array: ArrayRef = match data_type {
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(result.num_rows());
            for cell in cells {
                builder.append_option(cell.map(|v| parse_cell::<f64>(name, v)).transpose()?);
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(result.num_rows());
            for cell in cells {
                builder.append_option(cell.map(|v| parse_cell::<i64>(name, v)).transpose()?);
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(result.num_rows());
            for cell in cells {
                builder.append_option(cell.map(|v| parse_cell::<bool>(name, v)).transpose()?);
            }
            Arc::new(builder.finish())
        }
        DataType::Date32 => {
            let mut builder = Date32Builder::with_capacity(result.num_rows());
            for cell in cells {
                let days = cell
                    .map(|v| parse_cell::<NaiveDate>(name, v).map(days_since_epoch))
                    .transpose()?;
                builder.append_option(days);
            }
            Arc::new(builder.finish())
        }
        _ => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                builder.append_option(cell);
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

/// Convert a paged query result into a record batch
pub fn result_to_batch(result: &QueryResult) -> Result<RecordBatch> {
    let schema: SchemaRef = Arc::new(arrow_schema(&result.fields));

    let arrays = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| build_column(i, field.name(), field.data_type(), result))
        .collect::<Result<Vec<_>>>()?;

    let num_rows = result.num_rows();
    let num_columns = arrays.len();
    debug!(
        "Built Arrow batch with {num_rows} rows and {num_columns} columns",
        num_rows: num_rows,
        num_columns: num_columns
    );

    // Row count is explicit so zero-column results still report their rows
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Date32Type, Float64Type};

    fn field(name: &str, field_type: &str) -> TableFieldSchema {
        TableFieldSchema {
            name: name.into(),
            field_type: field_type.into(),
            mode: Some("NULLABLE".into()),
        }
    }

    fn epa_result(rows: Vec<Vec<Option<&str>>>) -> QueryResult {
        QueryResult {
            fields: vec![
                field(LAT, "FLOAT"),
                field(LON, "FLOAT"),
                field("o3", "FLOAT"),
                field(DATE, "DATE"),
                field(TIME, "STRING"),
            ],
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
        }
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(arrow_type("FLOAT"), DataType::Float64);
        assert_eq!(arrow_type("float64"), DataType::Float64);
        assert_eq!(arrow_type("INTEGER"), DataType::Int64);
        assert_eq!(arrow_type("BOOL"), DataType::Boolean);
        assert_eq!(arrow_type("DATE"), DataType::Date32);
        assert_eq!(arrow_type("TIME"), DataType::Utf8);
        assert_eq!(arrow_type("STRING"), DataType::Utf8);
    }

    #[test]
    fn test_result_to_batch() {
        let result = epa_result(vec![
            vec![Some("33.55"), Some("-112.06"), Some("0.031"), Some("2013-01-01"), Some("00:00")],
            vec![Some("33.55"), Some("-112.06"), None, Some("2017-12-31"), Some("23:00")],
        ]);
        let table = PollutantTable::from_result("o3", &result).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.value_index().unwrap(), 2);

        let batch = &table.batch;
        let values = batch.column(2).as_primitive::<Float64Type>();
        assert_eq!(values.value(0), 0.031);
        assert!(values.is_null(1));

        let dates = batch.column(3).as_primitive::<Date32Type>();
        assert_eq!(dates.value(0), 15706); // 2013-01-01
        assert_eq!(dates.value(1), 17531); // 2017-12-31

        assert_eq!(batch.column(4).as_string::<i32>().value(1), "23:00");
    }

    #[test]
    fn test_empty_result_keeps_schema() {
        let table = PollutantTable::from_result("o3", &epa_result(vec![])).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.batch.num_columns(), 5);
    }

    #[test]
    fn test_bad_cell_is_a_decode_error() {
        let result = epa_result(vec![vec![
            Some("north"),
            Some("-112.06"),
            Some("0.031"),
            Some("2013-01-01"),
            Some("00:00"),
        ]]);
        let err = PollutantTable::from_result("o3", &result).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_missing_value_column() {
        let result = epa_result(vec![]);
        let err = PollutantTable::from_result("no2", &result).unwrap_err();
        assert!(err.to_string().contains("no2"));
    }
}
