// Columnar Backend
//
// Operators over Arrow RecordBatches. Relations are converted into typed
// columns on the way in and back into rows on the way out; predicates,
// reordering and row selection run column-at-a-time with the Arrow kernels.

use datafusion::arrow::array::{
    new_null_array, Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray,
    UInt32Array,
};
use datafusion::arrow::compute::{cast, concat_batches, filter_record_batch, take};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    compare_for_sort, is_key_column, predicate_matches, right_column_name, Accumulator,
    BackendKind, ExecutionBackend, OpContext,
};
use crate::models::{
    FilterOperator, FilterSpec, FilterValue, JoinKey, KeyValue, MetricSpec, OrderSpec, Relation,
    Row, Value,
};
use crate::services::dag::error::ExecError;

/// Arrow-backed backend
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnarBackend;

impl ColumnarBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Widen two column types; None when they cannot share a column
fn unify_types(a: &DataType, b: &DataType) -> Option<DataType> {
    match (a, b) {
        _ if a == b => Some(a.clone()),
        (DataType::Null, other) | (other, DataType::Null) => Some(other.clone()),
        (DataType::Int64, DataType::Float64) | (DataType::Float64, DataType::Int64) => {
            Some(DataType::Float64)
        }
        _ => None,
    }
}

fn value_type(value: &Value) -> DataType {
    match value {
        Value::Null => DataType::Null,
        Value::Bool(_) => DataType::Boolean,
        Value::Int(_) => DataType::Int64,
        Value::Float(_) => DataType::Float64,
        Value::String(_) => DataType::Utf8,
    }
}

/// Build one typed column from the values of every row
fn build_column(
    ctx: OpContext<'_>,
    name: &str,
    rows: &Relation,
) -> Result<(Field, ArrayRef), ExecError> {
    let mut data_type = DataType::Null;
    for row in rows {
        if let Some(value) = row.get(name) {
            data_type = unify_types(&data_type, &value_type(value))
                .ok_or_else(|| ctx.mixed_types(name))?;
        }
    }

    let array: ArrayRef = match data_type {
        DataType::Boolean => {
            let values: Vec<Option<bool>> = rows
                .iter()
                .map(|row| match row.get(name) {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect();
            Arc::new(BooleanArray::from(values))
        }
        DataType::Int64 => {
            let values: Vec<Option<i64>> = rows
                .iter()
                .map(|row| match row.get(name) {
                    Some(Value::Int(i)) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(Int64Array::from(values))
        }
        DataType::Float64 => {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|row| row.get(name).and_then(Value::as_f64))
                .collect();
            Arc::new(Float64Array::from(values))
        }
        DataType::Utf8 => {
            let values: Vec<Option<&str>> = rows
                .iter()
                .map(|row| row.get(name).and_then(Value::as_str))
                .collect();
            Arc::new(StringArray::from(values))
        }
        _ => new_null_array(&DataType::Null, rows.len()),
    };

    Ok((Field::new(name, array.data_type().clone(), true), array))
}

fn make_batch(
    ctx: OpContext<'_>,
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
    num_rows: usize,
) -> Result<RecordBatch, ExecError> {
    let schema: SchemaRef = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    RecordBatch::try_new_with_options(schema, arrays, &options).map_err(|e| ctx.arrow_error(e))
}

/// Convert rows into a RecordBatch.
///
/// Columns appear in first-seen order across all rows; cells a row lacks
/// become nulls.
fn rows_to_batch(ctx: OpContext<'_>, rows: &Relation) -> Result<RecordBatch, ExecError> {
    let mut names: Vec<&str> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !names.contains(&column) {
                names.push(column);
            }
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    let mut arrays = Vec::with_capacity(names.len());
    for name in names {
        let (field, array) = build_column(ctx, name, rows)?;
        fields.push(field);
        arrays.push(array);
    }
    make_batch(ctx, fields, arrays, rows.len())
}

/// Read one cell back into a Value
fn value_at(ctx: OpContext<'_>, array: &ArrayRef, idx: usize) -> Result<Value, ExecError> {
    if array.data_type() == &DataType::Null || array.is_null(idx) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => {
            let array = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Boolean column"))?;
            Value::Bool(array.value(idx))
        }
        DataType::Int64 => {
            let array = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Int64 column"))?;
            Value::Int(array.value(idx))
        }
        DataType::Float64 => {
            let array = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Float64 column"))?;
            Value::Float(array.value(idx))
        }
        DataType::Utf8 => {
            let array = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Utf8 column"))?;
            Value::String(array.value(idx).to_string())
        }
        other => {
            return Err(ctx.arrow_error(format!("Unsupported column type: {}", other)));
        }
    };
    Ok(value)
}

/// Decode a whole column, or all nulls when the column is absent
fn column_values(
    ctx: OpContext<'_>,
    batch: &RecordBatch,
    name: &str,
) -> Result<Vec<Value>, ExecError> {
    match batch.column_by_name(name) {
        Some(array) => (0..batch.num_rows()).map(|i| value_at(ctx, array, i)).collect(),
        None => Ok(vec![Value::Null; batch.num_rows()]),
    }
}

/// Convert a RecordBatch back into rows; every row carries every column
fn batch_to_rows(ctx: OpContext<'_>, batch: &RecordBatch) -> Result<Relation, ExecError> {
    let schema = batch.schema();
    let mut rows = Vec::with_capacity(batch.num_rows());
    for row_idx in 0..batch.num_rows() {
        let mut row = Row::with_capacity(batch.num_columns());
        for (col_idx, field) in schema.fields().iter().enumerate() {
            row.insert(field.name().as_str(), value_at(ctx, batch.column(col_idx), row_idx)?);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Gather the given row positions of a column (or of an all-null column)
fn take_column(
    ctx: OpContext<'_>,
    column: Option<&ArrayRef>,
    indices: &UInt32Array,
) -> Result<ArrayRef, ExecError> {
    match column {
        Some(array) => take(array.as_ref(), indices, None).map_err(|e| ctx.arrow_error(e)),
        None => Ok(new_null_array(&DataType::Null, indices.len())),
    }
}

fn to_indices(positions: &[usize]) -> UInt32Array {
    UInt32Array::from(positions.iter().map(|p| *p as u32).collect::<Vec<u32>>())
}

/// Evaluate one predicate over a whole column.
///
/// Typed fast paths cover scalar comparisons on Int64, Float64 and Utf8
/// columns; anything else decodes the cell and uses the shared predicate.
fn predicate_mask(
    ctx: OpContext<'_>,
    batch: &RecordBatch,
    filter: &FilterSpec,
) -> Result<Vec<bool>, ExecError> {
    let num_rows = batch.num_rows();
    let Some(array) = batch.column_by_name(&filter.attribute) else {
        let verdict = predicate_matches(&Value::Null, filter);
        return Ok(vec![verdict; num_rows]);
    };

    let comparison = matches!(
        filter.operator,
        FilterOperator::Eq
            | FilterOperator::Ne
            | FilterOperator::Gt
            | FilterOperator::Gte
            | FilterOperator::Lt
            | FilterOperator::Lte
    );

    let check = |ordering: std::cmp::Ordering| -> bool {
        use std::cmp::Ordering::*;
        match filter.operator {
            FilterOperator::Eq => ordering == Equal,
            FilterOperator::Ne => ordering != Equal,
            FilterOperator::Gt => ordering == Greater,
            FilterOperator::Gte => ordering != Less,
            FilterOperator::Lt => ordering == Less,
            FilterOperator::Lte => ordering != Greater,
            _ => false,
        }
    };
    let null_verdict = predicate_matches(&Value::Null, filter);

    match (array.data_type(), &filter.value) {
        (DataType::Int64, FilterValue::Scalar(Value::Int(operand))) if comparison => {
            let ints = array
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Int64 column"))?;
            Ok((0..num_rows)
                .map(|i| {
                    if ints.is_null(i) {
                        null_verdict
                    } else {
                        check(ints.value(i).cmp(operand))
                    }
                })
                .collect())
        }
        (DataType::Float64, FilterValue::Scalar(operand @ (Value::Int(_) | Value::Float(_))))
            if comparison =>
        {
            let floats = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Float64 column"))?;
            let operand = operand.as_f64().unwrap_or(f64::NAN);
            Ok((0..num_rows)
                .map(|i| {
                    if floats.is_null(i) {
                        return null_verdict;
                    }
                    match floats.value(i).partial_cmp(&operand) {
                        Some(ordering) => check(ordering),
                        // NaN is unordered; only != holds
                        None => filter.operator == FilterOperator::Ne,
                    }
                })
                .collect())
        }
        (DataType::Utf8, FilterValue::Scalar(Value::String(operand))) if comparison => {
            let strings = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| ctx.arrow_error("Type mismatch reading Utf8 column"))?;
            Ok((0..num_rows)
                .map(|i| {
                    if strings.is_null(i) {
                        null_verdict
                    } else {
                        check(strings.value(i).cmp(operand.as_str()))
                    }
                })
                .collect())
        }
        _ => (0..num_rows)
            .map(|i| Ok(predicate_matches(&value_at(ctx, array, i)?, filter)))
            .collect(),
    }
}

/// Matched (left, right) row positions in left order, then right order
fn matched_positions(
    ctx: OpContext<'_>,
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[JoinKey],
) -> Result<(Vec<usize>, Vec<usize>), ExecError> {
    let key_tuples = |batch: &RecordBatch, names: Vec<&str>| -> Result<Vec<Vec<KeyValue>>, ExecError> {
        let columns = names
            .into_iter()
            .map(|name| column_values(ctx, batch, name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((0..batch.num_rows())
            .map(|i| columns.iter().map(|col| col[i].key()).collect())
            .collect())
    };

    let right_keys = key_tuples(right, keys.iter().map(|k| k.right.as_str()).collect())?;
    let mut index: HashMap<&Vec<KeyValue>, Vec<usize>> = HashMap::new();
    for (pos, key) in right_keys.iter().enumerate() {
        index.entry(key).or_default().push(pos);
    }

    let left_keys = key_tuples(left, keys.iter().map(|k| k.left.as_str()).collect())?;
    let mut left_positions = Vec::new();
    let mut right_positions = Vec::new();
    for (l, key) in left_keys.iter().enumerate() {
        if let Some(matches) = index.get(key) {
            for r in matches {
                left_positions.push(l);
                right_positions.push(*r);
            }
        }
    }
    Ok((left_positions, right_positions))
}

fn field_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect()
}

impl ExecutionBackend for ColumnarBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Columnar
    }

    fn union(&self, ctx: OpContext<'_>, inputs: &[&Relation]) -> Result<Relation, ExecError> {
        let batches = inputs
            .iter()
            .map(|rel| rows_to_batch(ctx, rel))
            .collect::<Result<Vec<_>, _>>()?;

        // Output columns: first input's order, then any extras in first-seen order
        let mut names: Vec<String> = Vec::new();
        let mut types: Vec<DataType> = Vec::new();
        for batch in &batches {
            for field in batch.schema().fields() {
                match names.iter().position(|n| n == field.name()) {
                    Some(pos) => {
                        types[pos] = unify_types(&types[pos], field.data_type())
                            .ok_or_else(|| ctx.mixed_types(field.name()))?;
                    }
                    None => {
                        names.push(field.name().clone());
                        types.push(field.data_type().clone());
                    }
                }
            }
        }

        let fields: Vec<Field> = names
            .iter()
            .zip(&types)
            .map(|(name, dt)| Field::new(name, dt.clone(), true))
            .collect();
        let schema: SchemaRef = Arc::new(Schema::new(fields.clone()));

        let mut aligned = Vec::with_capacity(batches.len());
        for batch in &batches {
            let mut arrays = Vec::with_capacity(names.len());
            for (name, dt) in names.iter().zip(&types) {
                let array = match batch.column_by_name(name) {
                    Some(array) => cast(array, dt).map_err(|e| ctx.arrow_error(e))?,
                    None => new_null_array(dt, batch.num_rows()),
                };
                arrays.push(array);
            }
            aligned.push(make_batch(ctx, fields.clone(), arrays, batch.num_rows())?);
        }

        let merged = if names.is_empty() {
            // Column-less rows cannot go through concat
            let total = aligned.iter().map(|b| b.num_rows()).sum();
            make_batch(ctx, Vec::new(), Vec::new(), total)?
        } else {
            concat_batches(&schema, &aligned).map_err(|e| ctx.arrow_error(e))?
        };
        batch_to_rows(ctx, &merged)
    }

    fn join(
        &self,
        ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError> {
        let left = rows_to_batch(ctx, left)?;
        let right = rows_to_batch(ctx, right)?;
        let (left_pos, right_pos) = matched_positions(ctx, &left, &right, keys)?;
        let left_idx = to_indices(&left_pos);
        let right_idx = to_indices(&right_pos);

        let mut columns: Vec<(String, ArrayRef)> = Vec::new();
        for key in keys {
            columns.push((
                key.left.clone(),
                take_column(ctx, left.column_by_name(&key.left), &left_idx)?,
            ));
        }
        for name in field_names(&left) {
            if !is_key_column(keys, &name, true) {
                let array = take_column(ctx, left.column_by_name(&name), &left_idx)?;
                columns.push((name, array));
            }
        }
        for name in field_names(&right) {
            if is_key_column(keys, &name, false) {
                continue;
            }
            let array = take_column(ctx, right.column_by_name(&name), &right_idx)?;
            let column = right_column_name(&name, |c| columns.iter().any(|(n, _)| n == c));
            columns.push((column, array));
        }

        let (fields, arrays): (Vec<Field>, Vec<ArrayRef>) = columns
            .into_iter()
            .map(|(name, array)| (Field::new(name, array.data_type().clone(), true), array))
            .unzip();
        let batch = make_batch(ctx, fields, arrays, left_pos.len())?;
        batch_to_rows(ctx, &batch)
    }

    fn compare(
        &self,
        ctx: OpContext<'_>,
        left: &Relation,
        right: &Relation,
        keys: &[JoinKey],
    ) -> Result<Relation, ExecError> {
        let left = rows_to_batch(ctx, left)?;
        let right = rows_to_batch(ctx, right)?;
        let (left_pos, right_pos) = matched_positions(ctx, &left, &right, keys)?;

        let mut columns: Vec<String> = field_names(&left)
            .into_iter()
            .filter(|c| !is_key_column(keys, c, true))
            .collect();
        for name in field_names(&right) {
            if !is_key_column(keys, &name, false) && !columns.contains(&name) {
                columns.push(name);
            }
        }

        // Keep pairs where any non-key column differs
        let decoded = columns
            .iter()
            .map(|c| Ok((column_values(ctx, &left, c)?, column_values(ctx, &right, c)?)))
            .collect::<Result<Vec<_>, ExecError>>()?;
        let (kept_left, kept_right): (Vec<usize>, Vec<usize>) = left_pos
            .iter()
            .zip(&right_pos)
            .filter(|(l, r)| {
                decoded
                    .iter()
                    .any(|(lv, rv)| !lv[**l].loose_eq(&rv[**r]))
            })
            .map(|(l, r)| (*l, *r))
            .unzip();
        let left_idx = to_indices(&kept_left);
        let right_idx = to_indices(&kept_right);

        let mut fields = Vec::new();
        let mut arrays = Vec::new();
        let mut push = |name: String, array: ArrayRef| {
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        };
        for key in keys {
            push(
                key.left.clone(),
                take_column(ctx, left.column_by_name(&key.left), &left_idx)?,
            );
        }
        for column in &columns {
            push(
                format!("left_{}", column),
                take_column(ctx, left.column_by_name(column), &left_idx)?,
            );
            push(
                format!("right_{}", column),
                take_column(ctx, right.column_by_name(column), &right_idx)?,
            );
        }

        let batch = make_batch(ctx, fields, arrays, kept_left.len())?;
        batch_to_rows(ctx, &batch)
    }

    fn filter(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        filters: &[FilterSpec],
    ) -> Result<Relation, ExecError> {
        let batch = rows_to_batch(ctx, input)?;
        let mut mask = vec![true; batch.num_rows()];
        for filter in filters {
            for (keep, matched) in mask.iter_mut().zip(predicate_mask(ctx, &batch, filter)?) {
                *keep = *keep && matched;
            }
        }

        if batch.num_columns() == 0 {
            let kept = mask.iter().filter(|k| **k).count();
            return Ok(vec![Row::new(); kept]);
        }
        let filtered = filter_record_batch(&batch, &BooleanArray::from(mask))
            .map_err(|e| ctx.arrow_error(e))?;
        batch_to_rows(ctx, &filtered)
    }

    fn aggregate(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        group_by: &[String],
        metrics: &[MetricSpec],
    ) -> Result<Relation, ExecError> {
        let batch = rows_to_batch(ctx, input)?;
        let group_columns = group_by
            .iter()
            .map(|c| column_values(ctx, &batch, c))
            .collect::<Result<Vec<_>, _>>()?;
        let metric_columns = metrics
            .iter()
            .map(|m| match &m.source_attribute {
                Some(source) => column_values(ctx, &batch, source),
                None => Ok(vec![Value::Null; batch.num_rows()]),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut positions: HashMap<Vec<KeyValue>, usize> = HashMap::new();
        let mut groups: Vec<(usize, Vec<Accumulator>)> = Vec::new();
        for row_idx in 0..batch.num_rows() {
            let key: Vec<KeyValue> = group_columns.iter().map(|col| col[row_idx].key()).collect();
            let slot = *positions.entry(key).or_insert_with(|| {
                groups.push((
                    row_idx,
                    metrics.iter().map(|m| Accumulator::new(m.aggregation)).collect(),
                ));
                groups.len() - 1
            });
            for (acc, values) in groups[slot].1.iter_mut().zip(&metric_columns) {
                acc.push(&values[row_idx]);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(first_row, accumulators)| {
                let mut row = Row::with_capacity(group_by.len() + metrics.len());
                for (column, values) in group_by.iter().zip(&group_columns) {
                    row.insert(column.as_str(), values[first_row].clone());
                }
                for (metric, acc) in metrics.iter().zip(accumulators) {
                    row.insert(metric.name.as_str(), acc.finish());
                }
                row
            })
            .collect())
    }

    fn project(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        columns: &[String],
    ) -> Result<Relation, ExecError> {
        if columns.is_empty() {
            return Ok(input.clone());
        }
        let batch = rows_to_batch(ctx, input)?;
        let mut fields = Vec::with_capacity(columns.len());
        let mut arrays = Vec::with_capacity(columns.len());
        for name in columns {
            let array = match batch.column_by_name(name) {
                Some(array) => array.clone(),
                None => new_null_array(&DataType::Null, batch.num_rows()),
            };
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        let projected = make_batch(ctx, fields, arrays, batch.num_rows())?;
        batch_to_rows(ctx, &projected)
    }

    fn sort(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        order_by: &[OrderSpec],
    ) -> Result<Relation, ExecError> {
        let batch = rows_to_batch(ctx, input)?;
        let sort_columns = order_by
            .iter()
            .map(|spec| Ok((column_values(ctx, &batch, &spec.attribute)?, spec.direction)))
            .collect::<Result<Vec<_>, ExecError>>()?;

        // Stable permutation, least significant key first
        let mut permutation: Vec<usize> = (0..batch.num_rows()).collect();
        for (values, direction) in sort_columns.iter().rev() {
            permutation.sort_by(|a, b| compare_for_sort(&values[*a], &values[*b], *direction));
        }

        if batch.num_columns() == 0 {
            return Ok(input.clone());
        }
        let indices = to_indices(&permutation);
        let arrays = batch
            .columns()
            .iter()
            .map(|col| take_column(ctx, Some(col), &indices))
            .collect::<Result<Vec<_>, _>>()?;
        let sorted = RecordBatch::try_new(batch.schema(), arrays).map_err(|e| ctx.arrow_error(e))?;
        batch_to_rows(ctx, &sorted)
    }

    fn limit(
        &self,
        ctx: OpContext<'_>,
        input: &Relation,
        limit: Option<usize>,
    ) -> Result<Relation, ExecError> {
        let batch = rows_to_batch(ctx, input)?;
        let length = limit.unwrap_or(usize::MAX).min(batch.num_rows());
        batch_to_rows(ctx, &batch.slice(0, length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Aggregation;
    use crate::row;
    use crate::services::dag::backend::RowBackend;

    fn ctx() -> OpContext<'static> {
        OpContext::new("node", "test")
    }

    fn sales() -> Relation {
        vec![
            row!("id" => 1i64, "region" => "west", "amount" => 10i64),
            row!("id" => 2i64, "region" => "east", "amount" => 2.5),
            row!("id" => 3i64, "region" => "west", "amount" => 7i64),
            row!("id" => 4i64, "region" => "north"),
        ]
    }

    #[test]
    fn test_rows_to_batch_widens_and_fills_nulls() {
        let batch = rows_to_batch(ctx(), &sales()).unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.num_columns(), 3);
        let amount = batch.column_by_name("amount").unwrap();
        assert_eq!(amount.data_type(), &DataType::Float64);
        assert!(amount.is_null(3));
    }

    #[test]
    fn test_mixed_column_types_rejected() {
        let rel = vec![row!("v" => 1i64), row!("v" => "one")];
        let err = rows_to_batch(ctx(), &rel).unwrap_err();
        assert!(matches!(err, ExecError::MixedColumnTypes { ref column, .. } if column == "v"));
    }

    #[test]
    fn test_empty_relation_converts() {
        let batch = rows_to_batch(ctx(), &Vec::new()).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert!(batch_to_rows(ctx(), &batch).unwrap().is_empty());
    }

    #[test]
    fn test_filter_fast_path_matches_row_backend() {
        let filters = vec![
            FilterSpec::new("amount", ">=", Value::Int(5)),
            FilterSpec::new("region", "!=", Value::from("east")),
        ];
        let columnar = ColumnarBackend.filter(ctx(), &sales(), &filters).unwrap();
        let ids: Vec<Value> = columnar.iter().map(|r| r.value("id")).collect();
        assert_eq!(ids, vec![Value::Int(1), Value::Int(3)]);

        let row = RowBackend.filter(ctx(), &sales(), &filters).unwrap();
        assert_eq!(row.len(), columnar.len());
    }

    #[test]
    fn test_filter_list_operators() {
        let filters = vec![FilterSpec::new(
            "region",
            "in",
            vec![Value::from("east"), Value::from("north")],
        )];
        let out = ColumnarBackend.filter(ctx(), &sales(), &filters).unwrap();
        assert_eq!(out.len(), 2);

        let filters = vec![FilterSpec::new("id", "between", vec![Value::Int(2), Value::Int(3)])];
        let out = ColumnarBackend.filter(ctx(), &sales(), &filters).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_join_matches_row_backend() {
        let left = vec![
            row!("id" => 1i64, "x" => 1i64),
            row!("id" => 2i64, "x" => 2i64),
            row!("id" => 2i64, "x" => 3i64),
        ];
        let right = vec![
            row!("key" => 2i64, "x" => 20i64, "y" => "b"),
            row!("key" => 1i64, "x" => 10i64, "y" => "a"),
        ];
        let keys = vec![JoinKey::new("id", "key")];

        let columnar = ColumnarBackend.join(ctx(), &left, &right, &keys).unwrap();
        let row = RowBackend.join(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(columnar, row);
        assert_eq!(columnar.len(), 3);
    }

    #[test]
    fn test_compare_matches_row_backend() {
        let left = vec![row!("id" => 1i64, "v" => 1i64), row!("id" => 2i64, "v" => 2i64)];
        let right = vec![row!("id" => 1i64, "v" => 1i64), row!("id" => 2i64, "v" => 5i64)];
        let keys = vec![JoinKey::new("id", "id")];

        let columnar = ColumnarBackend.compare(ctx(), &left, &right, &keys).unwrap();
        let row = RowBackend.compare(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(columnar, row);
        assert_eq!(columnar.len(), 1);
        assert_eq!(columnar[0].value("right_v"), Value::Int(5));
    }

    #[test]
    fn test_aggregate_matches_row_backend() {
        let rel = vec![
            row!("g" => "a", "v" => 1i64),
            row!("g" => "b", "v" => 2i64),
            row!("g" => "a", "v" => 3i64),
        ];
        let metrics = vec![
            MetricSpec::new("n", Aggregation::Count, None),
            MetricSpec::new("total", Aggregation::Sum, Some("v")),
            MetricSpec::new("lo", Aggregation::Min, Some("v")),
            MetricSpec::new("hi", Aggregation::Max, Some("v")),
        ];
        let group_by = vec!["g".to_string()];

        let columnar = ColumnarBackend.aggregate(ctx(), &rel, &group_by, &metrics).unwrap();
        let row = RowBackend.aggregate(ctx(), &rel, &group_by, &metrics).unwrap();
        assert_eq!(columnar, row);
        assert_eq!(columnar[0].value("total"), Value::Int(4));
    }

    #[test]
    fn test_aggregate_null_group_keys_match_row_backend() {
        let rel = vec![
            row!("x" => Value::Null, "v" => 1i64),
            row!("x" => "q", "v" => 2i64),
            row!("v" => 3i64),
        ];
        let metrics = vec![
            MetricSpec::new("n", Aggregation::Count, None),
            MetricSpec::new("total", Aggregation::Sum, Some("v")),
        ];
        let group_by = vec!["x".to_string()];

        let columnar = ColumnarBackend.aggregate(ctx(), &rel, &group_by, &metrics).unwrap();
        let row = RowBackend.aggregate(ctx(), &rel, &group_by, &metrics).unwrap();
        assert_eq!(columnar, row);
        assert_eq!(columnar.len(), 2);
        assert_eq!(columnar[0].value("x"), Value::Null);
        assert_eq!(columnar[0].value("total"), Value::Int(4));
    }

    #[test]
    fn test_join_rename_matches_row_backend() {
        let left = vec![row!("id" => 1i64, "v" => 1i64, "right_v" => 2i64)];
        let right = vec![row!("id" => 1i64, "v" => 3i64)];
        let keys = vec![JoinKey::new("id", "id")];

        let columnar = ColumnarBackend.join(ctx(), &left, &right, &keys).unwrap();
        let row = RowBackend.join(ctx(), &left, &right, &keys).unwrap();
        assert_eq!(columnar, row);
        assert_eq!(columnar[0].value("right_right_v"), Value::Int(3));
    }

    #[test]
    fn test_sort_and_limit() {
        let order = vec![OrderSpec::desc("id")];
        let sorted = ColumnarBackend.sort(ctx(), &sales(), &order).unwrap();
        let limited = ColumnarBackend.limit(ctx(), &sorted, Some(2)).unwrap();
        let ids: Vec<Value> = limited.iter().map(|r| r.value("id")).collect();
        assert_eq!(ids, vec![Value::Int(4), Value::Int(3)]);
    }

    #[test]
    fn test_union_widens_types() {
        let a = vec![row!("v" => 1i64)];
        let b = vec![row!("v" => 1.5)];
        let out = ColumnarBackend.union(ctx(), &[&a, &b]).unwrap();
        assert_eq!(out, vec![row!("v" => 1.0), row!("v" => 1.5)]);
    }

    #[test]
    fn test_project_reorders_columns() {
        let columns = vec!["region".to_string(), "id".to_string(), "none".to_string()];
        let out = ColumnarBackend.project(ctx(), &sales(), &columns).unwrap();
        let cols: Vec<&str> = out[0].columns().collect();
        assert_eq!(cols, vec!["region", "id", "none"]);
        assert_eq!(out[0].value("none"), Value::Null);
    }
}
