//! Conversion between [`Dataset`] and Arrow record batches, for sessions
//! backed by Arrow-native drivers.

use arrow::array::*;
use arrow::datatypes::{DataType as ArrowType, Field, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::{
    schema::{Column, DataType, Dataset, Row, Schema, Value},
    Result, SnowcheckError,
};

const DECIMAL_PRECISION: u8 = 38;
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

impl DataType {
    /// Maps an Arrow type onto the column types a dataset can hold. Types
    /// whose values cannot be converted (unsigned 64-bit, binary, nested)
    /// are rejected here rather than when the rows are read.
    pub fn from_arrow(arrow_type: &ArrowType) -> Result<Self> {
        let data_type = match arrow_type {
            ArrowType::Utf8 | ArrowType::LargeUtf8 => DataType::String,
            ArrowType::Int8
            | ArrowType::Int16
            | ArrowType::Int32
            | ArrowType::Int64
            | ArrowType::UInt8
            | ArrowType::UInt16
            | ArrowType::UInt32 => DataType::Integer,
            ArrowType::Float32 | ArrowType::Float64 => DataType::Float,
            ArrowType::Decimal128(_, _) => DataType::Decimal,
            ArrowType::Boolean => DataType::Boolean,
            ArrowType::Date32 => DataType::Date,
            ArrowType::Timestamp(_, _) => DataType::Timestamp,
            ArrowType::Null => DataType::Null,
            other => {
                return Err(SnowcheckError::InvalidArgument(format!(
                    "unsupported arrow type {}",
                    other
                )))
            }
        };
        Ok(data_type)
    }

    /// Arrow type used when writing this column. Decimal scale is decided per
    /// column from the data, see [`Dataset::to_record_batch`].
    pub fn to_arrow(&self) -> ArrowType {
        match self {
            DataType::String => ArrowType::Utf8,
            DataType::Integer => ArrowType::Int64,
            DataType::Float => ArrowType::Float64,
            DataType::Decimal => ArrowType::Decimal128(DECIMAL_PRECISION, 0),
            DataType::Boolean => ArrowType::Boolean,
            DataType::Date => ArrowType::Date32,
            DataType::Timestamp => ArrowType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            DataType::Null => ArrowType::Null,
        }
    }
}

impl Dataset {
    /// Collects record batches into a dataset. All batches must share the
    /// schema of the first one.
    pub fn from_record_batches(batches: &[RecordBatch]) -> Result<Dataset> {
        let Some(first) = batches.first() else {
            return Ok(Dataset::default());
        };

        let arrow_schema = first.schema();
        let columns = arrow_schema
            .fields()
            .iter()
            .map(|field| {
                let data_type = DataType::from_arrow(field.data_type()).map_err(|_| {
                    SnowcheckError::InvalidArgument(format!(
                        "column '{}' has unsupported arrow type {}",
                        field.name(),
                        field.data_type()
                    ))
                })?;
                Ok(Column::new(field.name().clone(), data_type, field.is_nullable()))
            })
            .collect::<Result<Vec<_>>>()?;
        let schema = Schema::new(columns);

        let mut rows = Vec::new();
        for batch in batches {
            if batch.schema().fields() != arrow_schema.fields() {
                return Err(SnowcheckError::InvalidArgument(
                    "record batches do not share a schema".to_string(),
                ));
            }
            rows.extend(record_batch_to_rows(batch)?);
        }

        Ok(Dataset::new(schema, rows))
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.schema.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.len());

        for (index, column) in self.schema.columns.iter().enumerate() {
            let array = build_column(&self.rows, index, column)?;
            fields.push(Field::new(
                column.name.clone(),
                array.data_type().clone(),
                column.nullable,
            ));
            arrays.push(array);
        }

        let schema = Arc::new(ArrowSchema::new(fields));
        if arrays.is_empty() {
            let options = RecordBatchOptions::new().with_row_count(Some(self.rows.len()));
            return Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?);
        }
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

fn record_batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let mut rows = vec![Vec::with_capacity(batch.num_columns()); batch.num_rows()];

    for (col_index, field) in batch.schema().fields().iter().enumerate() {
        let values = array_to_values(batch.column(col_index).as_ref(), field.name())?;
        for (row, value) in rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    Ok(rows.into_iter().map(Row::new).collect())
}

fn downcast<'a, T: 'static>(array: &'a dyn Array, column: &str) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        SnowcheckError::InvalidArgument(format!(
            "column '{}' has unexpected array type {}",
            column,
            array.data_type()
        ))
    })
}

fn array_to_values(array: &dyn Array, column: &str) -> Result<Vec<Value>> {
    let len = array.len();
    let values: Vec<Value> = match array.data_type() {
        ArrowType::Utf8 | ArrowType::LargeUtf8 => {
            let utf8 = arrow::compute::cast(array, &ArrowType::Utf8)?;
            let strings = downcast::<StringArray>(utf8.as_ref(), column)?;
            (0..len)
                .map(|i| {
                    if strings.is_null(i) {
                        Value::Null
                    } else {
                        Value::String(strings.value(i).to_string())
                    }
                })
                .collect()
        }
        ArrowType::Int8
        | ArrowType::Int16
        | ArrowType::Int32
        | ArrowType::Int64
        | ArrowType::UInt8
        | ArrowType::UInt16
        | ArrowType::UInt32 => {
            let widened = arrow::compute::cast(array, &ArrowType::Int64)?;
            let ints = downcast::<Int64Array>(widened.as_ref(), column)?;
            (0..len)
                .map(|i| {
                    if ints.is_null(i) {
                        Value::Null
                    } else {
                        Value::Integer(ints.value(i))
                    }
                })
                .collect()
        }
        ArrowType::Float32 | ArrowType::Float64 => {
            let widened = arrow::compute::cast(array, &ArrowType::Float64)?;
            let floats = downcast::<Float64Array>(widened.as_ref(), column)?;
            (0..len)
                .map(|i| {
                    if floats.is_null(i) {
                        Value::Null
                    } else {
                        Value::Float(floats.value(i))
                    }
                })
                .collect()
        }
        ArrowType::Decimal128(_, scale) => {
            let decimals = downcast::<Decimal128Array>(array, column)?;
            let scale = u32::try_from(*scale).map_err(|_| {
                SnowcheckError::InvalidArgument(format!(
                    "column '{}' has a negative decimal scale",
                    column
                ))
            })?;
            (0..len)
                .map(|i| {
                    if decimals.is_null(i) {
                        return Ok(Value::Null);
                    }
                    Decimal::try_from_i128_with_scale(decimals.value(i), scale)
                        .map(Value::Decimal)
                        .map_err(|e| {
                            SnowcheckError::InvalidArgument(format!(
                                "column '{}' holds a decimal out of range: {}",
                                column, e
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?
        }
        ArrowType::Boolean => {
            let bools = downcast::<BooleanArray>(array, column)?;
            (0..len)
                .map(|i| {
                    if bools.is_null(i) {
                        Value::Null
                    } else {
                        Value::Boolean(bools.value(i))
                    }
                })
                .collect()
        }
        ArrowType::Date32 => {
            let dates = downcast::<Date32Array>(array, column)?;
            (0..len)
                .map(|i| {
                    if dates.is_null(i) {
                        Value::Null
                    } else {
                        dates
                            .value_as_date(i)
                            .map(Value::Date)
                            .unwrap_or(Value::Null)
                    }
                })
                .collect()
        }
        ArrowType::Timestamp(_, tz) => {
            let micros = arrow::compute::cast(
                array,
                &ArrowType::Timestamp(TimeUnit::Microsecond, tz.clone()),
            )?;
            let timestamps = downcast::<TimestampMicrosecondArray>(micros.as_ref(), column)?;
            (0..len)
                .map(|i| {
                    if timestamps.is_null(i) {
                        Value::Null
                    } else {
                        DateTime::<Utc>::from_timestamp_micros(timestamps.value(i))
                            .map(Value::Timestamp)
                            .unwrap_or(Value::Null)
                    }
                })
                .collect()
        }
        ArrowType::Null => vec![Value::Null; len],
        other => {
            return Err(SnowcheckError::InvalidArgument(format!(
                "column '{}' has unsupported arrow type {}",
                column, other
            )))
        }
    };

    Ok(values)
}

fn mismatch(column: &Column, value: &Value) -> SnowcheckError {
    SnowcheckError::InvalidArgument(format!(
        "column '{}' is declared {} but holds {}",
        column.name,
        column.data_type,
        value.data_type()
    ))
}

fn build_column(rows: &[Row], index: usize, column: &Column) -> Result<ArrayRef> {
    let cells = rows.iter().map(|row| row.get(index).unwrap_or(&Value::Null));

    let array: ArrayRef = match column.data_type {
        DataType::String => {
            let mut builder = StringBuilder::new();
            for value in cells {
                match value {
                    Value::String(s) => builder.append_value(s),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Integer => {
            let mut builder = Int64Builder::new();
            for value in cells {
                match value {
                    Value::Integer(i) => builder.append_value(*i),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float => {
            let mut builder = Float64Builder::new();
            for value in cells {
                match value {
                    Value::Float(f) => builder.append_value(*f),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Decimal => {
            let scale = rows
                .iter()
                .filter_map(|row| match row.get(index) {
                    Some(Value::Decimal(d)) => Some(d.scale()),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            let mut builder = Decimal128Builder::new()
                .with_precision_and_scale(DECIMAL_PRECISION, scale as i8)?;
            for value in cells {
                match value {
                    Value::Decimal(d) => {
                        let mut rescaled = *d;
                        rescaled.rescale(scale);
                        builder.append_value(rescaled.mantissa());
                    }
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Boolean => {
            let mut builder = BooleanBuilder::new();
            for value in cells {
                match value {
                    Value::Boolean(b) => builder.append_value(*b),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Date => {
            let mut builder = Date32Builder::new();
            for value in cells {
                match value {
                    Value::Date(d) => {
                        builder.append_value(d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
                    }
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::new().with_timezone("UTC");
            for value in cells {
                match value {
                    Value::Timestamp(ts) => builder.append_value(ts.timestamp_micros()),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(column, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Null => Arc::new(NullArray::new(rows.len())),
    };

    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use chrono::{NaiveDate, TimeZone};
    use std::str::FromStr;

    fn people() -> Dataset {
        Dataset::new(
            Schema::new(vec![
                Column::new("ID", DataType::Integer, false),
                Column::new("NAME", DataType::String, true),
                Column::new("SCORE", DataType::Decimal, true),
            ]),
            vec![
                row![1i64, "alice", Decimal::from_str("1.5").unwrap()],
                row![2i64, None::<&str>, Decimal::from_str("20.25").unwrap()],
                row![3i64, "carol", None::<Decimal>],
            ],
        )
    }

    #[test]
    fn test_dataset_to_record_batch() {
        let batch = people().to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 3);
        assert_eq!(batch.schema().field(2).data_type(), &ArrowType::Decimal128(38, 2));
        assert!(!batch.schema().field(0).is_nullable());
    }

    #[test]
    fn test_record_batch_back_to_dataset() {
        let original = people();
        let batch = original.to_record_batch().unwrap();
        let restored = Dataset::from_record_batches(&[batch.clone(), batch]).unwrap();

        assert_eq!(restored.schema, original.schema);
        assert_eq!(restored.num_rows(), 6);
        assert_eq!(restored.rows[0], original.rows[0]);
        assert_eq!(restored.rows[4], original.rows[1]);
    }

    #[test]
    fn test_temporal_columns() {
        let ts = Utc.with_ymd_and_hms(2023, 5, 6, 7, 8, 9).unwrap();
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let dataset = Dataset::new(
            Schema::new(vec![
                Column::new("D", DataType::Date, true),
                Column::new("TS", DataType::Timestamp, true),
            ]),
            vec![Row::new(vec![Value::Date(date), Value::Timestamp(ts)])],
        );

        let batch = dataset.to_record_batch().unwrap();
        let restored = Dataset::from_record_batches(&[batch]).unwrap();
        assert_eq!(restored.rows, dataset.rows);
    }

    #[test]
    fn test_narrow_integers_are_widened() {
        let schema = Arc::new(ArrowSchema::new(vec![Field::new("N", ArrowType::Int32, true)]));
        let array: ArrayRef = Arc::new(Int32Array::from(vec![Some(7), None]));
        let batch = RecordBatch::try_new(schema, vec![array]).unwrap();

        let dataset = Dataset::from_record_batches(&[batch]).unwrap();
        assert_eq!(dataset.schema.columns[0].data_type, DataType::Integer);
        assert_eq!(dataset.rows, vec![row![7i64], Row::new(vec![Value::Null])]);
    }

    #[test]
    fn test_unsupported_arrow_types_are_rejected() {
        assert!(DataType::from_arrow(&ArrowType::UInt64).is_err());
        assert!(DataType::from_arrow(&ArrowType::Binary).is_err());
        assert_eq!(DataType::from_arrow(&ArrowType::UInt32).unwrap(), DataType::Integer);

        let schema = Arc::new(ArrowSchema::new(vec![Field::new("BIG", ArrowType::UInt64, true)]));
        let array: ArrayRef = Arc::new(UInt64Array::from(vec![Some(u64::MAX)]));
        let batch = RecordBatch::try_new(schema, vec![array]).unwrap();

        let err = Dataset::from_record_batches(&[batch]).unwrap_err();
        assert!(err
            .to_string()
            .contains("column 'BIG' has unsupported arrow type UInt64"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let dataset = Dataset::new(
            Schema::new(vec![Column::new("ID", DataType::Integer, false)]),
            vec![row!["not a number"]],
        );
        let err = dataset.to_record_batch().unwrap_err();
        assert!(err.to_string().contains("declared INTEGER but holds STRING"));
    }

    #[test]
    fn test_empty_batches() {
        let dataset = Dataset::from_record_batches(&[]).unwrap();
        assert!(dataset.schema.is_empty());
        assert_eq!(dataset.num_rows(), 0);
    }
}
