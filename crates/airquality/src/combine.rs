//! Combining per-pollutant tables into one table.
//!
//! Three strategies are offered and the caller must pick one:
//!
//! - [`CombineMode::Join`]: full outer join on (`Lat`, `Lon`, `Date`, `Time`),
//!   one value column per pollutant, nulls where a pollutant has no reading.
//! - [`CombineMode::Columns`]: side-by-side concatenation. Rows are paired by
//!   position only, shorter tables are padded with nulls.
//! - [`CombineMode::Long`]: tidy stack with `pollutant` and `value` columns.

use crate::error::{Error, Result};
use crate::table::{DATE, KEY_COLUMNS, LAT, LON, PollutantTable, TIME};
use arrow_array::builder::{Date32Builder, Float64Builder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::{Date32Type, Float64Type};
use arrow_array::{
    Array, ArrayRef, RecordBatch, RecordBatchOptions, StringArray, new_null_array,
};
use arrow_schema::{DataType, Field, Schema};
use diagnostics::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name of the pollutant column in long output
pub const POLLUTANT: &str = "pollutant";
/// Name of the measurement column in long output
pub const VALUE: &str = "value";

/// How per-pollutant tables are merged
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Full outer join on location and timestamp
    #[default]
    Join,
    /// Column-wise concatenation, rows paired by position
    Columns,
    /// Long format: one row per (observation, pollutant)
    Long,
}

impl fmt::Display for CombineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CombineMode::Join => "join",
            CombineMode::Columns => "columns",
            CombineMode::Long => "long",
        })
    }
}

/// Merge tables with the chosen strategy
pub fn combine(tables: &[PollutantTable], mode: CombineMode) -> Result<RecordBatch> {
    if tables.is_empty() {
        return Err(Error::Config("no pollutant tables to combine".into()));
    }
    let table_count = tables.len();
    debug!(
        "Combining {table_count} tables in {mode} mode",
        table_count: table_count,
        mode: mode.to_string()
    );

    let batch = match mode {
        CombineMode::Join => join_on_key(tables)?,
        CombineMode::Columns => concat_columns(tables)?,
        CombineMode::Long => stack_long(tables)?,
    };

    let rows = batch.num_rows();
    let columns = batch.num_columns();
    info!("Combined table has {rows} rows and {columns} columns", rows: rows, columns: columns);
    Ok(batch)
}

fn key_types() -> [DataType; 4] {
    [
        DataType::Float64,
        DataType::Float64,
        DataType::Date32,
        DataType::Utf8,
    ]
}

fn key_fields() -> Vec<Field> {
    KEY_COLUMNS
        .iter()
        .zip(key_types())
        .map(|(name, dt)| Field::new(*name, dt, true))
        .collect()
}

/// Key columns of a table, cast to the canonical key types
fn key_arrays(table: &PollutantTable) -> Result<Vec<ArrayRef>> {
    let schema = table.batch.schema();
    KEY_COLUMNS
        .iter()
        .zip(key_types())
        .map(|(name, dt)| {
            let index = schema.index_of(name).map_err(|_| {
                Error::Decode(format!(
                    "result for '{}' has no '{name}' column",
                    table.pollutant
                ))
            })?;
            Ok(arrow_cast::cast(table.batch.column(index), &dt)?)
        })
        .collect()
}

/// The measurement column as Float64
fn value_array(table: &PollutantTable) -> Result<ArrayRef> {
    let index = table.value_index()?;
    Ok(arrow_cast::cast(table.batch.column(index), &DataType::Float64)?)
}

/// Location and timestamp of one observation. Floats are ordered with
/// `total_cmp` so the key can live in a `BTreeMap`.
#[derive(Debug, Clone)]
struct ObservationKey {
    lat: Option<f64>,
    lon: Option<f64>,
    date: Option<i32>,
    time: Option<String>,
}

fn cmp_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

impl Ord for ObservationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_f64(self.lat, other.lat)
            .then_with(|| cmp_f64(self.lon, other.lon))
            .then_with(|| self.date.cmp(&other.date))
            .then_with(|| self.time.cmp(&other.time))
    }
}

impl PartialOrd for ObservationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ObservationKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ObservationKey {}

fn opt<T>(array: &dyn Array, i: usize, get: impl Fn(usize) -> T) -> Option<T> {
    if array.is_null(i) { None } else { Some(get(i)) }
}

fn join_on_key(tables: &[PollutantTable]) -> Result<RecordBatch> {
    let width = tables.len();
    // Outer None: no row for this pollutant. Inner None: row with a null value.
    let mut joined: BTreeMap<ObservationKey, Vec<Option<Option<f64>>>> = BTreeMap::new();

    for (slot, table) in tables.iter().enumerate() {
        let keys = key_arrays(table)?;
        let lat = keys[0].as_primitive::<Float64Type>();
        let lon = keys[1].as_primitive::<Float64Type>();
        let date = keys[2].as_primitive::<Date32Type>();
        let time = keys[3].as_string::<i32>();
        let values = value_array(table)?;
        let values = values.as_primitive::<Float64Type>();

        let mut duplicates = 0usize;
        for row in 0..table.num_rows() {
            let key = ObservationKey {
                lat: opt(lat, row, |i| lat.value(i)),
                lon: opt(lon, row, |i| lon.value(i)),
                date: opt(date, row, |i| date.value(i)),
                time: opt(time, row, |i| time.value(i).to_string()),
            };
            let entry = joined.entry(key).or_insert_with(|| vec![None; width]);
            if entry[slot].is_some() {
                duplicates += 1;
                continue;
            }
            entry[slot] = Some(opt(values, row, |i| values.value(i)));
        }

        if duplicates > 0 {
            let pollutant = &table.pollutant;
            warn!(
                "Ignored {duplicates} duplicate observations for {pollutant}; first value kept",
                duplicates: duplicates,
                pollutant: pollutant
            );
        }
    }

    let rows = joined.len();
    let mut lat = Float64Builder::with_capacity(rows);
    let mut lon = Float64Builder::with_capacity(rows);
    let mut date = Date32Builder::with_capacity(rows);
    let mut time = StringBuilder::new();
    let mut values: Vec<Float64Builder> = (0..width)
        .map(|_| Float64Builder::with_capacity(rows))
        .collect();

    for (key, slots) in joined {
        lat.append_option(key.lat);
        lon.append_option(key.lon);
        date.append_option(key.date);
        time.append_option(key.time);
        for (builder, slot) in values.iter_mut().zip(slots) {
            builder.append_option(slot.flatten());
        }
    }

    let mut fields = key_fields();
    fields.extend(
        tables
            .iter()
            .map(|t| Field::new(&t.pollutant, DataType::Float64, true)),
    );

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(lat.finish()),
        Arc::new(lon.finish()),
        Arc::new(date.finish()),
        Arc::new(time.finish()),
    ];
    arrays.extend(
        values
            .iter_mut()
            .map(|b| Arc::new(b.finish()) as ArrayRef),
    );

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Pad an array with trailing nulls up to `len`
fn pad_to(array: &ArrayRef, len: usize) -> Result<ArrayRef> {
    if array.len() >= len {
        return Ok(array.clone());
    }
    let padding = new_null_array(array.data_type(), len - array.len());
    Ok(arrow_select::concat::concat(&[array.as_ref(), padding.as_ref()])?)
}

fn concat_columns(tables: &[PollutantTable]) -> Result<RecordBatch> {
    let rows = tables.iter().map(PollutantTable::num_rows).max().unwrap_or(0);
    let suffix_keys = tables.len() > 1;

    let mut fields = Vec::new();
    let mut arrays = Vec::new();

    for table in tables {
        let pad = rows - table.num_rows();
        if pad > 0 {
            let pollutant = &table.pollutant;
            debug!("Padding {pollutant} with {pad} null rows", pollutant: pollutant, pad: pad);
        }
        let schema = table.batch.schema();
        for (field, array) in schema.fields().iter().zip(table.batch.columns()) {
            let name = if suffix_keys && KEY_COLUMNS.contains(&field.name().as_str()) {
                format!("{}_{}", field.name(), table.pollutant)
            } else {
                field.name().clone()
            };
            fields.push(Field::new(name, field.data_type().clone(), true));
            arrays.push(pad_to(array, rows)?);
        }
    }

    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::new(Schema::new(fields)),
        arrays,
        &options,
    )?)
}

fn long_schema() -> Schema {
    let mut fields = key_fields();
    fields.push(Field::new(POLLUTANT, DataType::Utf8, false));
    fields.push(Field::new(VALUE, DataType::Float64, true));
    Schema::new(fields)
}

fn stack_long(tables: &[PollutantTable]) -> Result<RecordBatch> {
    let schema = Arc::new(long_schema());
    let batches = tables
        .iter()
        .map(|table| {
            let mut arrays = key_arrays(table)?;
            let names: StringArray =
                std::iter::repeat_n(Some(table.pollutant.as_str()), table.num_rows()).collect();
            arrays.push(Arc::new(names));
            arrays.push(value_array(table)?);
            Ok(RecordBatch::try_new(schema.clone(), arrays)?)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(arrow_select::concat::concat_batches(&schema, &batches)?)
}
