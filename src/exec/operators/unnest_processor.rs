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
//! Unnest processor that flattens array and map columns into rows.
//!
//! Responsibilities:
//! - Expands each input row into as many output rows as its longest unnest column, padding
//!   shorter columns with nulls and repeating replicated columns.
//! - Emits output in batches of roughly the configured row target without ever splitting one
//!   input row across batches.
//!
//! Key exported interfaces:
//! - Types: `UnnestProcessorFactory`.
//!
//! Current limitations:
//! - Only ARRAY and MAP columns can be unnested; the ordinality column must be BIGINT.

use std::ops::Range;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::compute::take;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

use crate::common::config;
use crate::common::ids::PlanNodeId;
use crate::common::logging::debug;
use crate::exec::chunk::{Chunk, slot_index};
use crate::exec::node::unnest::UnnestNode;
use crate::exec::operators::unnest_columns::{
    DecodedUnnestColumn, UnnestColumnKind, build_element_mapping, build_repeat_indices,
    split_struct_elements,
};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::runtime::runtime_state::RuntimeState;

/// Plan-time layout shared by every operator instance.
#[derive(Debug)]
struct UnnestLayout {
    replicate_columns: Vec<usize>,
    unnest_columns: Vec<(usize, UnnestColumnKind)>,
    with_ordinality: bool,
    output_schema: SchemaRef,
}

impl UnnestLayout {
    fn try_new(node: &UnnestNode) -> Result<Self, String> {
        if node.unnest_slots.is_empty() {
            return Err("unsupported: unnest requires at least one unnest column".to_string());
        }
        let input = node.input_schema.as_ref();

        let mut expected_types = Vec::new();
        let mut replicate_columns = Vec::with_capacity(node.replicate_slots.len());
        for slot in &node.replicate_slots {
            let idx = slot_index(input, *slot)?;
            expected_types.push(input.field(idx).data_type().clone());
            replicate_columns.push(idx);
        }
        let num_replicated = expected_types.len();

        let mut unnest_columns = Vec::with_capacity(node.unnest_slots.len());
        for slot in &node.unnest_slots {
            let idx = slot_index(input, *slot)?;
            let data_type = input.field(idx).data_type();
            let kind = UnnestColumnKind::resolve(data_type, node.unnest_array_of_rows)
                .ok_or_else(|| {
                    format!(
                        "unsupported: unnest operator supports only ARRAY and MAP types, slot {} has {:?}",
                        slot, data_type
                    )
                })?;
            expected_types.extend(kind.output_types());
            unnest_columns.push((idx, kind));
        }
        let num_flattened = expected_types.len() - num_replicated;

        let declared = node.output_schema.fields();
        let expected_len = expected_types.len() + usize::from(node.with_ordinality);
        if declared.len() != expected_len {
            return Err(format!(
                "unnest output schema mismatch: expected {} columns, got {}",
                expected_len,
                declared.len()
            ));
        }
        if node.with_ordinality {
            let ordinality = &declared[expected_types.len()];
            if ordinality.data_type() != &DataType::Int64 {
                return Err(format!(
                    "unsupported: ordinality column should be BIGINT type, got {:?}",
                    ordinality.data_type()
                ));
            }
        }
        for (idx, (field, expected)) in declared.iter().zip(expected_types.iter()).enumerate() {
            if field.data_type() != expected {
                return Err(format!(
                    "unnest output column {} ({}) type mismatch: declared {:?}, produced {:?}",
                    idx,
                    field.name(),
                    field.data_type(),
                    expected
                ));
            }
        }

        // Padded element columns always carry nulls; ordinality never does.
        let fields: Vec<Field> = declared
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let field = field.as_ref().clone();
                if idx < num_replicated {
                    field
                } else if idx < num_replicated + num_flattened {
                    field.with_nullable(true)
                } else {
                    field.with_nullable(false)
                }
            })
            .collect();
        let output_schema = Arc::new(Schema::new_with_metadata(
            fields,
            node.output_schema.metadata().clone(),
        ));

        Ok(Self {
            replicate_columns,
            unnest_columns,
            with_ordinality: node.with_ordinality,
            output_schema,
        })
    }
}

/// Factory for unnest processors.
pub struct UnnestProcessorFactory {
    name: String,
    layout: Arc<UnnestLayout>,
    output_batch_rows: Option<usize>,
}

impl UnnestProcessorFactory {
    /// Validate the plan; an unsupported unnest column or ordinality type is a configuration
    /// error raised here, before any operator runs.
    pub fn try_new(node: &UnnestNode) -> Result<Self, String> {
        let layout = UnnestLayout::try_new(node)?;
        Ok(Self {
            name: PlanNodeId(node.node_id).label("Unnest"),
            layout: Arc::new(layout),
            output_batch_rows: config::unnest_output_batch_rows(),
        })
    }

    /// Override the output row target; otherwise the runtime chunk size is used.
    pub fn with_output_batch_rows(mut self, rows: usize) -> Self {
        self.output_batch_rows = Some(rows.max(1));
        self
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.layout.output_schema)
    }
}

impl OperatorFactory for UnnestProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Box<dyn Operator> {
        debug!(
            "create {} driver_id={} output_batch_rows={:?}",
            self.name, driver_id, self.output_batch_rows
        );
        Box::new(UnnestProcessorOperator {
            name: self.name.clone(),
            layout: Arc::clone(&self.layout),
            output_batch_rows: self.output_batch_rows,
            cursor: UnnestCursor::default(),
            finishing: false,
        })
    }
}

struct UnnestInput {
    chunk: Chunk,
    unnest_columns: Vec<DecodedUnnestColumn>,
    // Per input row: the largest element count across unnest columns.
    max_sizes: Vec<usize>,
}

/// Resume point inside the buffered input batch.
#[derive(Default)]
struct UnnestCursor {
    input: Option<UnnestInput>,
    next_input_row: usize,
}

impl UnnestCursor {
    fn reset(&mut self) {
        self.input = None;
        self.next_input_row = 0;
    }
}

struct UnnestProcessorOperator {
    name: String,
    layout: Arc<UnnestLayout>,
    output_batch_rows: Option<usize>,
    cursor: UnnestCursor,
    finishing: bool,
}

impl Operator for UnnestProcessorOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_finished(&self) -> bool {
        self.finishing && self.cursor.input.is_none()
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for UnnestProcessorOperator {
    fn need_input(&self) -> bool {
        !self.finishing && self.cursor.input.is_none()
    }

    fn has_output(&self) -> bool {
        self.cursor.input.is_some()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if !self.need_input() {
            return Err("unnest push_chunk called when operator does not need input".to_string());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        let mut unnest_columns = Vec::with_capacity(self.layout.unnest_columns.len());
        for (idx, _) in &self.layout.unnest_columns {
            let column = chunk.column(*idx)?;
            unnest_columns.push(DecodedUnnestColumn::decode(&column)?);
        }
        let max_sizes = (0..chunk.len())
            .map(|row| {
                unnest_columns
                    .iter()
                    .map(|column| column.size_at(row))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        self.cursor.input = Some(UnnestInput {
            chunk,
            unnest_columns,
            max_sizes,
        });
        self.cursor.next_input_row = 0;
        Ok(())
    }

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String> {
        let target = self
            .output_batch_rows
            .unwrap_or_else(|| state.chunk_size())
            .max(1);
        produce_next(&self.layout, &mut self.cursor, target)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        debug!(
            "{} set_finishing buffered_input={}",
            self.name,
            self.cursor.input.is_some()
        );
        self.finishing = true;
        Ok(())
    }
}

/// Emit the next output batch from the buffered input, advancing `cursor`.
///
/// Whole input rows are taken until their element total reaches `target`; at least one row is
/// always taken. A run whose total is zero (the rest of the batch is empty or null) is
/// discarded along with the batch.
fn produce_next(
    layout: &UnnestLayout,
    cursor: &mut UnnestCursor,
    target: usize,
) -> Result<Option<Chunk>, String> {
    let Some(input) = cursor.input.as_ref() else {
        return Ok(None);
    };
    let start = cursor.next_input_row;
    let total_rows = input.chunk.len();
    let mut end = start;
    let mut num_elements = 0usize;
    while end < total_rows {
        num_elements = num_elements
            .checked_add(input.max_sizes[end])
            .ok_or_else(|| "unnest output row count overflow".to_string())?;
        end += 1;
        if num_elements >= target {
            break;
        }
    }

    if num_elements == 0 {
        cursor.reset();
        return Ok(None);
    }

    let chunk = generate_output(layout, input, start..end, num_elements)?;
    if end >= total_rows {
        cursor.reset();
    } else {
        cursor.next_input_row = end;
    }
    Ok(Some(chunk))
}

fn generate_output(
    layout: &UnnestLayout,
    input: &UnnestInput,
    rows: Range<usize>,
    num_elements: usize,
) -> Result<Chunk, String> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(layout.output_schema.fields().len());

    if !layout.replicate_columns.is_empty() {
        let repeat = build_repeat_indices(rows.clone(), &input.max_sizes, num_elements)?;
        for idx in &layout.replicate_columns {
            let column = input.chunk.column(*idx)?;
            let repeated = take(column.as_ref(), &repeat, None)
                .map_err(|e| format!("unnest replicate column {idx} failed: {e}"))?;
            columns.push(repeated);
        }
    }

    for ((_, kind), decoded) in layout.unnest_columns.iter().zip(&input.unnest_columns) {
        let mapping = build_element_mapping(decoded, rows.clone(), &input.max_sizes, num_elements)?;
        match kind {
            UnnestColumnKind::Array { .. } => {
                let elements = decoded
                    .elements()
                    .ok_or_else(|| "unnest array column has no elements".to_string())?;
                columns.push(mapping.apply(elements)?);
            }
            UnnestColumnKind::SplitArray { .. } => {
                let elements = decoded
                    .elements()
                    .ok_or_else(|| "unnest array column has no elements".to_string())?;
                columns.extend(split_struct_elements(elements, &mapping)?);
            }
            UnnestColumnKind::Map { .. } => {
                let (keys, values) = decoded
                    .entries()
                    .ok_or_else(|| "unnest map column has no entries".to_string())?;
                columns.push(mapping.apply(keys)?);
                columns.push(mapping.apply(values)?);
            }
        }
    }

    if layout.with_ordinality {
        let ordinality = Int64Array::from_iter_values(
            rows.flat_map(|row| 1..=input.max_sizes[row] as i64),
        );
        columns.push(Arc::new(ordinality));
    }

    Chunk::try_from_columns(Arc::clone(&layout.output_schema), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::SlotId;
    use crate::exec::chunk::field_with_slot_id;
    use crate::exec::operators::unnest_columns::ElementMapping;

    use arrow::array::{
        Array, DictionaryArray, Int32Array, Int32Builder, LargeListArray, ListArray, MapBuilder,
        RunArray, StringArray, StringBuilder, StructArray, UInt32Array,
    };
    use arrow::datatypes::{Fields, Int32Type};
    use arrow_buffer::{NullBuffer, OffsetBuffer};

    fn slot_field(name: &str, data_type: DataType, slot: u32) -> Field {
        field_with_slot_id(Field::new(name, data_type, true), SlotId::new(slot))
    }

    fn int_list_type() -> DataType {
        DataType::List(Arc::new(Field::new_list_field(DataType::Int32, true)))
    }

    fn int_list(rows: Vec<Option<Vec<Option<i32>>>>) -> ArrayRef {
        Arc::new(ListArray::from_iter_primitive::<Int32Type, _, _>(rows))
    }

    /// `id: Int32` replicated, `arr: List<Int32>` unnested into `elem`.
    fn list_node(with_ordinality: bool) -> UnnestNode {
        let input_schema = Arc::new(Schema::new(vec![
            slot_field("id", DataType::Int32, 1),
            slot_field("arr", int_list_type(), 2),
        ]));
        let mut out = vec![
            slot_field("id", DataType::Int32, 1),
            slot_field("elem", DataType::Int32, 3),
        ];
        if with_ordinality {
            out.push(slot_field("ord", DataType::Int64, 4));
        }
        UnnestNode {
            node_id: 7,
            input_schema,
            replicate_slots: vec![SlotId::new(1)],
            unnest_slots: vec![SlotId::new(2)],
            with_ordinality,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(out)),
        }
    }

    fn list_chunk(node: &UnnestNode, ids: Vec<i32>, arr: ArrayRef) -> Chunk {
        Chunk::try_from_columns(
            Arc::clone(&node.input_schema),
            vec![Arc::new(Int32Array::from(ids)), arr],
        )
        .expect("chunk")
    }

    fn ints(column: &ArrayRef) -> Vec<Option<i32>> {
        column
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32")
            .iter()
            .collect()
    }

    fn run_all(factory: &UnnestProcessorFactory, chunk: Chunk) -> Vec<Chunk> {
        let state = RuntimeState::default();
        let mut op = factory.create(1, 0);
        let processor = op.as_processor_mut().expect("processor");
        processor.push_chunk(&state, chunk).expect("push");
        processor.set_finishing(&state).expect("finishing");
        let mut out = Vec::new();
        while let Some(chunk) = processor.pull_chunk(&state).expect("pull") {
            out.push(chunk);
        }
        assert!(op.is_finished());
        out
    }

    #[test]
    fn null_array_rows_produce_no_output() {
        let node = list_node(false);
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        assert_eq!(factory.name(), "Unnest (id=7)");
        let arr = int_list(vec![Some(vec![Some(10), Some(20)]), None]);
        let out = run_all(&factory, list_chunk(&node, vec![1, 2], arr));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 2);
        let id = out[0].column_by_slot_id(SlotId::new(1)).expect("id");
        let elem = out[0].column_by_slot_id(SlotId::new(3)).expect("elem");
        assert_eq!(ints(&id), vec![Some(1), Some(1)]);
        assert_eq!(ints(&elem), vec![Some(10), Some(20)]);
    }

    #[test]
    fn ordinality_counts_from_one_per_row() {
        let node = list_node(true);
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let arr = int_list(vec![
            Some(vec![Some(1), Some(2), Some(3)]),
            Some(vec![]),
            Some(vec![Some(4)]),
        ]);
        let out = run_all(&factory, list_chunk(&node, vec![1, 2, 3], arr));
        assert_eq!(out.len(), 1);
        let ord = out[0].column_by_slot_id(SlotId::new(4)).expect("ord");
        let ord = ord.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(ord.values().to_vec(), vec![1, 2, 3, 1]);
        assert_eq!(out[0].schema().fields().len(), 3);
        assert!(!out[0].schema().field(2).is_nullable());
    }

    #[test]
    fn rows_are_never_split_across_batches() {
        let node = list_node(false);
        let factory = UnnestProcessorFactory::try_new(&node)
            .expect("factory")
            .with_output_batch_rows(2);
        let arr = int_list(vec![
            Some(vec![Some(1), Some(2), Some(3), Some(4), Some(5)]),
            Some(vec![Some(6)]),
            Some(vec![Some(7)]),
            Some(vec![Some(8)]),
        ]);
        let out = run_all(&factory, list_chunk(&node, vec![1, 2, 3, 4], arr));
        let sizes: Vec<usize> = out.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![5, 2, 1]);
        let ids: Vec<Option<i32>> = out
            .iter()
            .flat_map(|c| ints(&c.column_by_slot_id(SlotId::new(1)).expect("id")))
            .collect();
        assert_eq!(
            ids,
            vec![Some(1), Some(1), Some(1), Some(1), Some(1), Some(2), Some(3), Some(4)]
        );
    }

    #[test]
    fn all_empty_batch_is_discarded() {
        let node = list_node(true);
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let arr = int_list(vec![None, Some(vec![]), None]);
        let out = run_all(&factory, list_chunk(&node, vec![1, 2, 3], arr));
        assert!(out.is_empty());
    }

    #[test]
    fn map_column_produces_key_and_value_columns() {
        let mut builder = MapBuilder::new(None, StringBuilder::new(), Int32Builder::new());
        builder.keys().append_value("x");
        builder.values().append_value(1);
        builder.append(true).expect("map row");
        builder.append(false).expect("null row");
        let map: ArrayRef = Arc::new(builder.finish());

        let input_schema = Arc::new(Schema::new(vec![slot_field("m", map.data_type().clone(), 1)]));
        let node = UnnestNode {
            node_id: -1,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1)],
            with_ordinality: false,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("k", DataType::Utf8, 2),
                slot_field("v", DataType::Int32, 3),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        assert_eq!(factory.name(), "Unnest");
        let chunk = Chunk::try_from_columns(input_schema, vec![map]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let keys = out[0].column_by_slot_id(SlotId::new(2)).expect("keys");
        let keys = keys.as_any().downcast_ref::<StringArray>().expect("utf8");
        assert_eq!(keys.value(0), "x");
        let values = out[0].column_by_slot_id(SlotId::new(3)).expect("values");
        assert_eq!(ints(&values), vec![Some(1)]);
    }

    #[test]
    fn ragged_columns_pad_shorter_side() {
        let input_schema = Arc::new(Schema::new(vec![
            slot_field("a", int_list_type(), 1),
            slot_field("b", int_list_type(), 2),
        ]));
        let node = UnnestNode {
            node_id: 1,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1), SlotId::new(2)],
            with_ordinality: false,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("a_elem", DataType::Int32, 3),
                slot_field("b_elem", DataType::Int32, 4),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let a = int_list(vec![Some(vec![Some(1), Some(2)]), None]);
        let b = int_list(vec![Some(vec![Some(9)]), Some(vec![Some(8)])]);
        let chunk = Chunk::try_from_columns(input_schema, vec![a, b]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let a = out[0].column_by_slot_id(SlotId::new(3)).expect("a");
        let b = out[0].column_by_slot_id(SlotId::new(4)).expect("b");
        assert_eq!(ints(&a), vec![Some(1), Some(2), None]);
        assert_eq!(ints(&b), vec![Some(9), None, Some(8)]);
    }

    #[test]
    fn dictionary_wrapped_array_column_is_unnested() {
        let dict_type = DataType::Dictionary(Box::new(DataType::Int32), Box::new(int_list_type()));
        let input_schema = Arc::new(Schema::new(vec![slot_field("arr", dict_type, 1)]));
        let node = UnnestNode {
            node_id: 2,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1)],
            with_ordinality: true,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("elem", DataType::Int32, 2),
                slot_field("ord", DataType::Int64, 3),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let values = int_list(vec![Some(vec![Some(1), Some(2)]), Some(vec![Some(3)])]);
        let keys = Int32Array::from(vec![1, 0, 1]);
        let dict: ArrayRef =
            Arc::new(DictionaryArray::<Int32Type>::try_new(keys, values).expect("dictionary"));
        let chunk = Chunk::try_from_columns(input_schema, vec![dict]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let elem = out[0].column_by_slot_id(SlotId::new(2)).expect("elem");
        assert_eq!(ints(&elem), vec![Some(3), Some(1), Some(2), Some(3)]);
        let ord = out[0].column_by_slot_id(SlotId::new(3)).expect("ord");
        let ord = ord.as_any().downcast_ref::<Int64Array>().expect("int64");
        assert_eq!(ord.values().to_vec(), vec![1, 1, 2, 1]);
    }

    #[test]
    fn array_of_rows_splits_struct_fields() {
        let struct_fields = Fields::from(vec![
            Field::new("x", DataType::Int32, true),
            Field::new("y", DataType::Utf8, true),
        ]);
        let struct_type = DataType::Struct(struct_fields.clone());
        let structs = StructArray::new(
            struct_fields,
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
            Some(NullBuffer::from(vec![true, false, true])),
        );
        let element = Arc::new(Field::new_list_field(struct_type, true));
        let list: ArrayRef = Arc::new(ListArray::new(
            Arc::clone(&element),
            OffsetBuffer::from_lengths([2, 1]),
            Arc::new(structs),
            None,
        ));
        let input_schema = Arc::new(Schema::new(vec![slot_field(
            "rows",
            DataType::List(element),
            1,
        )]));
        let node = UnnestNode {
            node_id: 3,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1)],
            with_ordinality: false,
            unnest_array_of_rows: true,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("x", DataType::Int32, 2),
                slot_field("y", DataType::Utf8, 3),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let chunk = Chunk::try_from_columns(input_schema, vec![list]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let x = out[0].column_by_slot_id(SlotId::new(2)).expect("x");
        assert_eq!(ints(&x), vec![Some(1), None, Some(3)]);
        let y = out[0].column_by_slot_id(SlotId::new(3)).expect("y");
        let y = y.as_any().downcast_ref::<StringArray>().expect("utf8");
        assert!(y.is_null(1));
        assert_eq!(y.value(2), "c");
    }

    #[test]
    fn large_list_empty_row_is_padded_against_sibling() {
        let large_type = DataType::LargeList(Arc::new(Field::new_list_field(DataType::Int32, true)));
        let input_schema = Arc::new(Schema::new(vec![
            slot_field("x", large_type, 1),
            slot_field("y", int_list_type(), 2),
        ]));
        let node = UnnestNode {
            node_id: 5,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1), SlotId::new(2)],
            with_ordinality: false,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("x_elem", DataType::Int32, 3),
                slot_field("y_elem", DataType::Int32, 4),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let x: ArrayRef = Arc::new(LargeListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![]),
            Some(vec![Some(7)]),
        ]));
        let y = int_list(vec![Some(vec![Some(1), Some(2)]), Some(vec![])]);
        let chunk = Chunk::try_from_columns(input_schema, vec![x, y]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let x = out[0].column_by_slot_id(SlotId::new(3)).expect("x");
        let y = out[0].column_by_slot_id(SlotId::new(4)).expect("y");
        assert_eq!(ints(&x), vec![None, None, Some(7)]);
        assert_eq!(ints(&y), vec![Some(1), Some(2), None]);
    }

    #[test]
    fn dictionary_map_spans_several_pulls() {
        let mut builder = MapBuilder::new(None, StringBuilder::new(), Int32Builder::new());
        builder.keys().append_value("y");
        builder.values().append_value(2);
        builder.keys().append_value("z");
        builder.values().append_value(3);
        builder.append(true).expect("map row");
        builder.keys().append_value("x");
        builder.values().append_value(1);
        builder.append(true).expect("map row");
        let maps: ArrayRef = Arc::new(builder.finish());
        let keys = Int32Array::from(vec![Some(0), None, Some(1), Some(0)]);
        let dict: ArrayRef =
            Arc::new(DictionaryArray::<Int32Type>::try_new(keys, maps).expect("dictionary"));

        let input_schema = Arc::new(Schema::new(vec![
            slot_field("id", DataType::Int32, 1),
            slot_field("m", dict.data_type().clone(), 2),
        ]));
        let node = UnnestNode {
            node_id: 6,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![SlotId::new(1)],
            unnest_slots: vec![SlotId::new(2)],
            with_ordinality: true,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("id", DataType::Int32, 1),
                slot_field("k", DataType::Utf8, 3),
                slot_field("v", DataType::Int32, 4),
                slot_field("ord", DataType::Int64, 5),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node)
            .expect("factory")
            .with_output_batch_rows(2);
        let ids: ArrayRef = Arc::new(Int32Array::from(vec![10, 20, 30, 40]));
        let chunk = Chunk::try_from_columns(input_schema, vec![ids, dict]).expect("chunk");
        let out = run_all(&factory, chunk);

        let sizes: Vec<usize> = out.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![2, 3]);
        let ids: Vec<Option<i32>> = out
            .iter()
            .flat_map(|c| ints(&c.column_by_slot_id(SlotId::new(1)).expect("id")))
            .collect();
        assert_eq!(ids, vec![Some(10), Some(10), Some(30), Some(40), Some(40)]);
        let keys: Vec<String> = out
            .iter()
            .flat_map(|c| {
                let keys = c.column_by_slot_id(SlotId::new(3)).expect("keys");
                let keys = keys.as_any().downcast_ref::<StringArray>().expect("utf8");
                keys.iter()
                    .map(|k| k.expect("key").to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(keys, vec!["y", "z", "x", "y", "z"]);
        let values: Vec<Option<i32>> = out
            .iter()
            .flat_map(|c| ints(&c.column_by_slot_id(SlotId::new(4)).expect("values")))
            .collect();
        assert_eq!(values, vec![Some(2), Some(3), Some(1), Some(2), Some(3)]);
        let ord: Vec<i64> = out
            .iter()
            .flat_map(|c| {
                let ord = c.column_by_slot_id(SlotId::new(5)).expect("ord");
                let ord = ord.as_any().downcast_ref::<Int64Array>().expect("int64");
                ord.values().to_vec()
            })
            .collect();
        assert_eq!(ord, vec![1, 2, 1, 1, 2]);
    }

    #[test]
    fn run_end_encoded_list_is_unnested() {
        let base = int_list(vec![Some(vec![Some(7)]), Some(vec![Some(8), Some(9)])]);
        let run_ends = Int32Array::from(vec![2, 3]);
        let run: ArrayRef =
            Arc::new(RunArray::<Int32Type>::try_new(&run_ends, base.as_ref()).expect("run array"));
        let input_schema = Arc::new(Schema::new(vec![
            slot_field("id", DataType::Int32, 1),
            slot_field("arr", run.data_type().clone(), 2),
        ]));
        let node = UnnestNode {
            node_id: 8,
            input_schema: Arc::clone(&input_schema),
            replicate_slots: vec![SlotId::new(1)],
            unnest_slots: vec![SlotId::new(2)],
            with_ordinality: false,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![
                slot_field("id", DataType::Int32, 1),
                slot_field("elem", DataType::Int32, 3),
            ])),
        };
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let ids: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let chunk = Chunk::try_from_columns(input_schema, vec![ids, run]).expect("chunk");
        let out = run_all(&factory, chunk);
        assert_eq!(out.len(), 1);
        let id = out[0].column_by_slot_id(SlotId::new(1)).expect("id");
        let elem = out[0].column_by_slot_id(SlotId::new(3)).expect("elem");
        assert_eq!(ints(&id), vec![Some(1), Some(2), Some(3), Some(3)]);
        assert_eq!(ints(&elem), vec![Some(7), Some(7), Some(8), Some(9)]);
    }

    #[test]
    fn identity_slice_matches_gathered_values() {
        let arr = int_list(vec![
            Some(vec![Some(1), Some(2)]),
            Some(vec![Some(3)]),
            Some(vec![Some(4), None]),
        ]);
        let decoded = DecodedUnnestColumn::decode(&arr).expect("decode");
        let max_sizes: Vec<usize> = (0..3).map(|r| decoded.size_at(r)).collect();
        let identity = build_element_mapping(&decoded, 1..3, &max_sizes, 3).expect("mapping");
        assert!(matches!(identity, ElementMapping::Identity { .. }));
        let gathered = ElementMapping::Indices(UInt32Array::from(vec![2, 3, 4]));
        let elements = decoded.elements().expect("elements");
        let left = identity.apply(elements).expect("identity");
        let right = gathered.apply(elements).expect("gather");
        assert_eq!(ints(&left), ints(&right));
    }

    #[test]
    fn non_container_unnest_column_is_rejected() {
        let input_schema = Arc::new(Schema::new(vec![slot_field("a", DataType::Int32, 1)]));
        let node = UnnestNode {
            node_id: 4,
            input_schema,
            replicate_slots: vec![],
            unnest_slots: vec![SlotId::new(1)],
            with_ordinality: false,
            unnest_array_of_rows: false,
            output_schema: Arc::new(Schema::new(vec![slot_field("e", DataType::Int32, 2)])),
        };
        let err = UnnestProcessorFactory::try_new(&node)
            .err()
            .expect("unsupported type");
        assert!(err.contains("supports only ARRAY and MAP"), "err={err}");
    }

    #[test]
    fn non_bigint_ordinality_is_rejected() {
        let mut node = list_node(true);
        let mut fields: Vec<Field> = node
            .output_schema
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields[2] = slot_field("ord", DataType::Int32, 4);
        node.output_schema = Arc::new(Schema::new(fields));
        let err = UnnestProcessorFactory::try_new(&node)
            .err()
            .expect("bad ordinality");
        assert!(err.contains("ordinality column should be BIGINT"), "err={err}");
    }

    #[test]
    fn push_while_buffered_is_rejected() {
        let node = list_node(false);
        let factory = UnnestProcessorFactory::try_new(&node).expect("factory");
        let state = RuntimeState::default();
        let mut op = factory.create(1, 0);
        let processor = op.as_processor_mut().expect("processor");
        let arr = int_list(vec![Some(vec![Some(1)])]);
        processor
            .push_chunk(&state, list_chunk(&node, vec![1], Arc::clone(&arr)))
            .expect("push");
        assert!(!processor.need_input());
        assert!(processor.has_output());
        assert!(
            processor
                .push_chunk(&state, list_chunk(&node, vec![2], arr))
                .is_err()
        );
    }
}
