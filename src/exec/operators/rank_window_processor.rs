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
//! Streaming rank-like window evaluation.
//!
//! Responsibilities:
//! - Feeds sorted input into a `RankLikeWindowBuild` and evaluates `row_number`, `rank` and
//!   `dense_rank` over partitions as their rows arrive.
//! - Emits input columns followed by one BIGINT column per window function.
//!
//! Key exported interfaces:
//! - Types: `RankWindowProcessorFactory`.
//!
//! Current limitations:
//! - Only functions whose value depends on rows already seen in the partition are supported.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::compute::SortOptions;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::common::config;
use crate::common::ids::PlanNodeId;
use crate::common::logging::debug;
use crate::exec::chunk::{Chunk, field_with_slot_id, slot_index};
use crate::exec::node::analytic::{RankFunctionKind, RankFunctionCall, RankWindowNode, SortKeyColumn};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::row_container::{KeyProjection, RowAddress, materialized_schema};
use crate::exec::window::{RankLikeWindowBuild, WindowPartitionView};
use crate::runtime::mem_tracker::{self, MemTracker};
use crate::runtime::runtime_state::RuntimeState;

#[derive(Debug)]
struct RankWindowLayout {
    input_schema: SchemaRef,
    partition_key: KeyProjection,
    sort_key: KeyProjection,
    functions: Vec<RankFunctionKind>,
    output_schema: SchemaRef,
}

fn key_projection(schema: &Schema, keys: &[SortKeyColumn]) -> Result<KeyProjection, String> {
    let mut columns = Vec::with_capacity(keys.len());
    let mut options = Vec::with_capacity(keys.len());
    for key in keys {
        columns.push(slot_index(schema, key.slot)?);
        options.push(SortOptions {
            descending: !key.asc,
            nulls_first: key.nulls_first,
        });
    }
    KeyProjection::new(columns, options)
}

fn function_column_name(kind: RankFunctionKind) -> &'static str {
    match kind {
        RankFunctionKind::RowNumber => "row_number",
        RankFunctionKind::Rank => "rank",
        RankFunctionKind::DenseRank => "dense_rank",
    }
}

impl RankWindowLayout {
    fn try_new(node: &RankWindowNode) -> Result<Self, String> {
        if node.functions.is_empty() {
            return Err("rank window requires at least one window function".to_string());
        }
        let input = node.input_schema.as_ref();
        let partition_key = key_projection(input, &node.partition_keys)?;
        let sort_key = key_projection(input, &node.sort_keys)?;

        // Rejects key types the row format cannot compare.
        RankLikeWindowBuild::try_new(input, partition_key.clone(), sort_key.clone(), None)?;

        let stored = materialized_schema(input);
        let mut fields: Vec<Field> = stored.fields().iter().map(|f| f.as_ref().clone()).collect();
        for RankFunctionCall { kind, output_slot } in &node.functions {
            if slot_index(input, *output_slot).is_ok() {
                return Err(format!(
                    "rank window output slot {} collides with an input slot",
                    output_slot
                ));
            }
            let field = Field::new(
                format!("{}_{}", function_column_name(*kind), output_slot),
                DataType::Int64,
                false,
            );
            fields.push(field_with_slot_id(field, *output_slot));
        }
        Ok(Self {
            input_schema: Arc::clone(&node.input_schema),
            partition_key,
            sort_key,
            functions: node.functions.iter().map(|f| f.kind).collect(),
            output_schema: Arc::new(Schema::new(fields)),
        })
    }
}

/// Factory for streaming `row_number` / `rank` / `dense_rank` processors.
pub struct RankWindowProcessorFactory {
    name: String,
    layout: Arc<RankWindowLayout>,
    mem_limit_bytes: Option<i64>,
}

impl RankWindowProcessorFactory {
    pub fn try_new(node: &RankWindowNode) -> Result<Self, String> {
        let layout = RankWindowLayout::try_new(node)?;
        Ok(Self {
            name: PlanNodeId(node.node_id).label("RankWindow"),
            layout: Arc::new(layout),
            mem_limit_bytes: config::window_build_mem_limit_bytes(),
        })
    }

    /// Cap the bytes one operator instance may hold in its window build.
    pub fn with_mem_limit_bytes(mut self, limit: i64) -> Self {
        self.mem_limit_bytes = Some(limit);
        self
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.layout.output_schema)
    }
}

impl OperatorFactory for RankWindowProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, _driver_id: i32) -> Box<dyn Operator> {
        Box::new(RankWindowProcessorOperator {
            name: self.name.clone(),
            layout: Arc::clone(&self.layout),
            mem_limit_bytes: self.mem_limit_bytes,
            build: None,
            emit: None,
            finishing: false,
        })
    }
}

/// Evaluation progress inside the partition being emitted.
struct PartitionCursor {
    partition: usize,
    next_row: usize,
    rank: i64,
    dense_rank: i64,
    last_row: Option<RowAddress>,
}

impl PartitionCursor {
    fn new(partition: usize) -> Self {
        Self {
            partition,
            next_row: 0,
            rank: 0,
            dense_rank: 0,
            last_row: None,
        }
    }
}

struct RankWindowProcessorOperator {
    name: String,
    layout: Arc<RankWindowLayout>,
    mem_limit_bytes: Option<i64>,
    // Created on first input so the build can charge the query's tracker.
    build: Option<RankLikeWindowBuild>,
    emit: Option<PartitionCursor>,
    finishing: bool,
}

impl RankWindowProcessorOperator {
    fn build_mut(&mut self, state: &RuntimeState) -> Result<&mut RankLikeWindowBuild, String> {
        if self.build.is_none() {
            let parent = state
                .mem_tracker()
                .unwrap_or_else(mem_tracker::process_mem_tracker);
            let tracker = match self.mem_limit_bytes {
                Some(limit) => MemTracker::new_child_with_limit(self.name.as_str(), limit, &parent),
                None => MemTracker::new_child(self.name.as_str(), &parent),
            };
            let build = RankLikeWindowBuild::try_new(
                self.layout.input_schema.as_ref(),
                self.layout.partition_key.clone(),
                self.layout.sort_key.clone(),
                Some(tracker),
            )?;
            self.build = Some(build);
        }
        self.build
            .as_mut()
            .ok_or_else(|| "rank window build missing".to_string())
    }
}

impl Operator for RankWindowProcessorOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_finished(&self) -> bool {
        self.finishing && !self.has_output()
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for RankWindowProcessorOperator {
    fn need_input(&self) -> bool {
        !self.finishing
    }

    fn has_output(&self) -> bool {
        let Some(build) = self.build.as_ref() else {
            return false;
        };
        let Some(cursor) = self.emit.as_ref() else {
            return build.has_next_partition();
        };
        match build.partition(cursor.partition) {
            Some(view) => {
                cursor.next_row < view.num_rows()
                    || (view.is_finished() && build.has_next_partition())
            }
            None => false,
        }
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if self.finishing {
            return Err("rank window push_chunk called after set_finishing".to_string());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.build_mut(state)?.add_input(&chunk)
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String> {
        let chunk_size = state.chunk_size();
        let Some(build) = self.build.as_mut() else {
            return Ok(None);
        };
        loop {
            if self.emit.is_none() {
                if !build.has_next_partition() {
                    return Ok(None);
                }
                let index = build.next_partition()?.index();
                self.emit = Some(PartitionCursor::new(index));
            }
            let Some(cursor) = self.emit.as_mut() else {
                return Ok(None);
            };
            let view = build
                .partition(cursor.partition)
                .ok_or_else(|| format!("window partition {} missing", cursor.partition))?;
            if cursor.next_row < view.num_rows() {
                let end = cursor.next_row.saturating_add(chunk_size).min(view.num_rows());
                return evaluate_rows(&self.layout, &view, cursor, end).map(Some);
            }
            if !view.is_finished() {
                // Wait for more rows of this partition.
                return Ok(None);
            }
            self.emit = None;
        }
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.finishing = true;
        if let Some(build) = self.build.as_mut() {
            build.no_more_input()?;
        }
        debug!("{} set_finishing has_build={}", self.name, self.build.is_some());
        Ok(())
    }
}

fn evaluate_rows(
    layout: &RankWindowLayout,
    view: &WindowPartitionView<'_>,
    cursor: &mut PartitionCursor,
    end: usize,
) -> Result<Chunk, String> {
    let start = cursor.next_row;
    let rows = view.rows(start..end)?;
    let mut row_numbers = Vec::with_capacity(rows.len());
    let mut ranks = Vec::with_capacity(rows.len());
    let mut dense_ranks = Vec::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        let position = (start + offset) as i64 + 1;
        let new_peer_group = match cursor.last_row {
            Some(prev) => !view.is_peer(prev, *row),
            None => true,
        };
        if new_peer_group {
            cursor.rank = position;
            cursor.dense_rank += 1;
        }
        cursor.last_row = Some(*row);
        row_numbers.push(position);
        ranks.push(cursor.rank);
        dense_ranks.push(cursor.dense_rank);
    }
    cursor.next_row = end;

    let mut columns = view.gather_rows(&rows)?;
    for kind in &layout.functions {
        let values = match kind {
            RankFunctionKind::RowNumber => &row_numbers,
            RankFunctionKind::Rank => &ranks,
            RankFunctionKind::DenseRank => &dense_ranks,
        };
        columns.push(Arc::new(Int64Array::from(values.clone())) as ArrayRef);
    }
    Chunk::try_from_columns(Arc::clone(&layout.output_schema), columns)
}
