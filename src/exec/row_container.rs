// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Append-only row storage for window builds.
//!
//! Responsibilities:
//! - Materializes every input chunk (dictionary columns decoded) and hands out stable
//!   [`RowAddress`] handles that stay valid for the container's lifetime.
//! - Encodes partition and sort key projections with Arrow's row format so two stored rows can
//!   be compared without touching the original columns.
//!
//! Key exported interfaces:
//! - Types: `RowContainer`, `RowAddress`, `KeyProjection`, `KeyKind`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, new_empty_array};
use arrow::compute::{SortOptions, cast, interleave};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::row::{RowConverter, Rows, SortField};

use crate::exec::chunk::{Chunk, record_batch_bytes};
use crate::runtime::mem_tracker::MemTracker;

/// Stable handle of one stored row: the stored batch and the row inside it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowAddress {
    batch: u32,
    row: u32,
}

impl RowAddress {
    pub fn batch(self) -> usize {
        self.batch as usize
    }

    pub fn row(self) -> usize {
        self.row as usize
    }
}

/// Ordered column positions plus per-column direction and null ordering.
#[derive(Clone, Debug, Default)]
pub struct KeyProjection {
    pub columns: Vec<usize>,
    pub options: Vec<SortOptions>,
}

impl KeyProjection {
    pub fn new(columns: Vec<usize>, options: Vec<SortOptions>) -> Result<Self, String> {
        if columns.len() != options.len() {
            return Err(format!(
                "key projection mismatch: columns={} options={}",
                columns.len(),
                options.len()
            ));
        }
        Ok(Self { columns, options })
    }

    /// Ascending, nulls-first projection over `columns`.
    pub fn ascending(columns: Vec<usize>) -> Self {
        let options = vec![SortOptions::default(); columns.len()];
        Self { columns, options }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Partition,
    Sort,
}

struct KeyEncoder {
    projection: KeyProjection,
    // None for an empty projection: every row compares equal.
    converter: Option<RowConverter>,
    rows: Vec<Rows>,
}

impl KeyEncoder {
    fn try_new(projection: KeyProjection, schema: &Schema) -> Result<Self, String> {
        if projection.is_empty() {
            return Ok(Self {
                projection,
                converter: None,
                rows: Vec::new(),
            });
        }
        let mut fields = Vec::with_capacity(projection.columns.len());
        let mut key_types = Vec::with_capacity(projection.columns.len());
        for (col, options) in projection.columns.iter().zip(projection.options.iter()) {
            let field = schema.fields().get(*col).ok_or_else(|| {
                format!(
                    "key column {} out of range (num_columns={})",
                    col,
                    schema.fields().len()
                )
            })?;
            key_types.push(field.data_type().clone());
            fields.push(SortField::new_with_options(
                field.data_type().clone(),
                *options,
            ));
        }
        if !RowConverter::supports_fields(&fields) {
            return Err(format!(
                "unsupported key types for row comparison: {:?}",
                key_types
            ));
        }
        let converter = RowConverter::new(fields).map_err(|e| e.to_string())?;
        Ok(Self {
            projection,
            converter: Some(converter),
            rows: Vec::new(),
        })
    }

    fn encode(&self, columns: &[ArrayRef]) -> Result<Option<Rows>, String> {
        let Some(converter) = self.converter.as_ref() else {
            return Ok(None);
        };
        let keys = self
            .projection
            .columns
            .iter()
            .map(|col| Arc::clone(&columns[*col]))
            .collect::<Vec<_>>();
        converter
            .convert_columns(&keys)
            .map(Some)
            .map_err(|e| format!("encode key rows failed: {e}"))
    }

    fn rows_differ(&self, left: RowAddress, right: RowAddress) -> bool {
        if self.converter.is_none() {
            return false;
        }
        self.rows[left.batch()].row(left.row()) != self.rows[right.batch()].row(right.row())
    }
}

/// Append-only arena of materialized rows.
pub struct RowContainer {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    partition_key: KeyEncoder,
    sort_key: KeyEncoder,
    num_rows: u32,
    reserved_bytes: i64,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl RowContainer {
    pub fn try_new(
        input_schema: &Schema,
        partition_key: KeyProjection,
        sort_key: KeyProjection,
        mem_tracker: Option<Arc<MemTracker>>,
    ) -> Result<Self, String> {
        let schema = materialized_schema(input_schema);
        let partition_key = KeyEncoder::try_new(partition_key, &schema)?;
        let sort_key = KeyEncoder::try_new(sort_key, &schema)?;
        Ok(Self {
            schema,
            batches: Vec::new(),
            partition_key,
            sort_key,
            num_rows: 0,
            reserved_bytes: 0,
            mem_tracker,
        })
    }

    /// Schema of the stored rows: the input schema with dictionary columns decoded.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows as usize
    }

    pub fn reserved_bytes(&self) -> i64 {
        self.reserved_bytes
    }

    /// Allocate one row per chunk row, store all column values and return the new addresses in
    /// input order.
    pub fn store_chunk(&mut self, chunk: &Chunk) -> Result<Vec<RowAddress>, String> {
        if chunk.columns().len() != self.schema.fields().len() {
            return Err(format!(
                "row container schema mismatch: expected {} columns, got {}",
                self.schema.fields().len(),
                chunk.columns().len()
            ));
        }
        let rows = u32::try_from(chunk.len())
            .ok()
            .and_then(|rows| self.num_rows.checked_add(rows).map(|_| rows))
            .ok_or_else(|| {
                format!(
                    "row container row count overflow: stored={} incoming={}",
                    self.num_rows,
                    chunk.len()
                )
            })?;
        let batch_idx = u32::try_from(self.batches.len())
            .map_err(|_| "row container batch count overflow".to_string())?;

        let mut columns = Vec::with_capacity(chunk.columns().len());
        for (column, field) in chunk.columns().iter().zip(self.schema.fields().iter()) {
            columns.push(materialize_column(column, field.data_type())?);
        }
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), columns)
            .map_err(|e| format!("row container store batch failed: {e}"))?;
        let partition_rows = self.partition_key.encode(batch.columns())?;
        let sort_rows = self.sort_key.encode(batch.columns())?;

        let bytes = record_batch_bytes(&batch)
            .saturating_add(partition_rows.as_ref().map(|r| r.size()).unwrap_or(0))
            .saturating_add(sort_rows.as_ref().map(|r| r.size()).unwrap_or(0));
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        if let Some(tracker) = self.mem_tracker.as_ref() {
            tracker.try_consume(bytes)?;
        }
        self.reserved_bytes = self.reserved_bytes.saturating_add(bytes);

        if let Some(rows) = partition_rows {
            self.partition_key.rows.push(rows);
        }
        if let Some(rows) = sort_rows {
            self.sort_key.rows.push(rows);
        }
        self.batches.push(batch);
        self.num_rows += rows;

        Ok((0..rows)
            .map(|row| RowAddress {
                batch: batch_idx,
                row,
            })
            .collect())
    }

    /// True when the two rows differ on the given key projection.
    pub fn rows_differ(&self, left: RowAddress, right: RowAddress, key: KeyKind) -> bool {
        match key {
            KeyKind::Partition => self.partition_key.rows_differ(left, right),
            KeyKind::Sort => self.sort_key.rows_differ(left, right),
        }
    }

    /// Read back column `col` for `addresses`, in address order.
    pub fn gather_column(&self, col: usize, addresses: &[RowAddress]) -> Result<ArrayRef, String> {
        let field = self.schema.fields().get(col).ok_or_else(|| {
            format!(
                "row container column {} out of range (num_columns={})",
                col,
                self.schema.fields().len()
            )
        })?;
        if addresses.is_empty() {
            return Ok(new_empty_array(field.data_type()));
        }
        let sources: Vec<&dyn Array> = self
            .batches
            .iter()
            .map(|batch| batch.column(col).as_ref())
            .collect();
        let indices: Vec<(usize, usize)> = addresses
            .iter()
            .map(|addr| (addr.batch(), addr.row()))
            .collect();
        interleave(&sources, &indices).map_err(|e| format!("gather column {col} failed: {e}"))
    }

    pub fn gather_columns(&self, addresses: &[RowAddress]) -> Result<Vec<ArrayRef>, String> {
        (0..self.schema.fields().len())
            .map(|col| self.gather_column(col, addresses))
            .collect()
    }
}

impl Drop for RowContainer {
    fn drop(&mut self) {
        if let Some(tracker) = self.mem_tracker.as_ref() {
            tracker.release(self.reserved_bytes);
        }
    }
}

pub(crate) fn materialized_schema(input: &Schema) -> SchemaRef {
    let fields = input
        .fields()
        .iter()
        .map(|f| match f.data_type() {
            DataType::Dictionary(_, value_type) => {
                Field::new(f.name(), value_type.as_ref().clone(), f.is_nullable())
                    .with_metadata(f.metadata().clone())
            }
            _ => f.as_ref().clone(),
        })
        .collect::<Vec<_>>();
    Arc::new(Schema::new_with_metadata(fields, input.metadata().clone()))
}

fn materialize_column(column: &ArrayRef, target: &DataType) -> Result<ArrayRef, String> {
    if column.data_type() == target {
        return Ok(Arc::clone(column));
    }
    match column.data_type() {
        DataType::Dictionary(_, value_type) if value_type.as_ref() == target => {
            cast(column.as_ref(), target).map_err(|e| format!("decode dictionary column: {e}"))
        }
        other => Err(format!(
            "row container column type mismatch: expected {:?}, got {:?}",
            target, other
        )),
    }
}
