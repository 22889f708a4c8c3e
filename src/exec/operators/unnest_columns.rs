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
//! Column decoding helpers for the unnest processor.
//!
//! Responsibilities:
//! - Peels dictionary and run-end wrappers off array/map columns and exposes a uniform
//!   `{size, offset, null}` view per input row.
//! - Builds per-output-row element mappings (with null padding) and applies them to element
//!   children, including struct-field splitting.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, StructArray, UInt32Array, UInt32Builder};
use arrow::compute::take;
use arrow::datatypes::{DataType, FieldRef, Fields, Int16Type, Int32Type, Int64Type};
use arrow_buffer::{NullBuffer, OffsetBuffer};

/// Output shape of one unnest column, resolved from its declared type.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum UnnestColumnKind {
    /// One output column of the element type.
    Array { element: FieldRef },
    /// One output column per struct field of the element type.
    SplitArray { fields: Fields },
    /// Key column then value column.
    Map { key: FieldRef, value: FieldRef },
}

impl UnnestColumnKind {
    pub(crate) fn resolve(data_type: &DataType, split_struct_elements: bool) -> Option<Self> {
        match data_type {
            DataType::Dictionary(_, value_type) => Self::resolve(value_type, split_struct_elements),
            DataType::RunEndEncoded(_, values) => {
                Self::resolve(values.data_type(), split_struct_elements)
            }
            DataType::List(element) | DataType::LargeList(element) => {
                if split_struct_elements
                    && let DataType::Struct(fields) = peel_dictionary(element.data_type())
                {
                    return Some(Self::SplitArray {
                        fields: fields.clone(),
                    });
                }
                Some(Self::Array {
                    element: Arc::clone(element),
                })
            }
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(fields) if fields.len() == 2 => Some(Self::Map {
                    key: Arc::clone(&fields[0]),
                    value: Arc::clone(&fields[1]),
                }),
                _ => None,
            },
            _ => None,
        }
    }

    /// Data types of the output columns this unnest column produces, in order.
    pub(crate) fn output_types(&self) -> Vec<DataType> {
        match self {
            Self::Array { element } => vec![element.data_type().clone()],
            Self::SplitArray { fields } => fields.iter().map(|f| f.data_type().clone()).collect(),
            Self::Map { key, value } => vec![key.data_type().clone(), value.data_type().clone()],
        }
    }
}

fn peel_dictionary(data_type: &DataType) -> &DataType {
    match data_type {
        DataType::Dictionary(_, value_type) => value_type.as_ref(),
        other => other,
    }
}

#[derive(Clone, Debug)]
enum Offsets {
    Small(OffsetBuffer<i32>),
    Large(OffsetBuffer<i64>),
}

impl Offsets {
    fn start_and_len(&self, idx: usize) -> (usize, usize) {
        match self {
            Self::Small(offsets) => {
                let start = offsets[idx] as usize;
                (start, offsets[idx + 1] as usize - start)
            }
            Self::Large(offsets) => {
                let start = offsets[idx] as usize;
                (start, offsets[idx + 1] as usize - start)
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Children {
    Elements(ArrayRef),
    Entries { keys: ArrayRef, values: ArrayRef },
}

/// An unnest input column reduced to its base container plus an optional row indirection.
#[derive(Clone, Debug)]
pub(crate) struct DecodedUnnestColumn {
    base: ArrayRef,
    offsets: Offsets,
    children: Children,
    // Row -> base row; `None` when the column is not wrapped.
    indices: Option<Vec<usize>>,
    // Nulls of the wrapper itself (dictionary keys).
    outer_nulls: Option<NullBuffer>,
}

impl DecodedUnnestColumn {
    pub(crate) fn decode(array: &ArrayRef) -> Result<Self, String> {
        match array.data_type() {
            DataType::Dictionary(_, _) => {
                let dict = array
                    .as_any_dictionary_opt()
                    .ok_or_else(|| "unnest dictionary column downcast failed".to_string())?;
                let indices = dict.normalized_keys();
                let outer_nulls = dict.keys().logical_nulls();
                Self::decode_base(dict.values(), Some(indices), outer_nulls)
            }
            DataType::RunEndEncoded(run_ends, _) => {
                let num_rows = u32::try_from(array.len())
                    .map_err(|_| format!("unnest run-end column too long: {}", array.len()))?;
                let logical: Vec<u32> = (0..num_rows).collect();
                let (values, physical) = match run_ends.data_type() {
                    DataType::Int16 => run_physical::<Int16Type>(array, &logical)?,
                    DataType::Int32 => run_physical::<Int32Type>(array, &logical)?,
                    DataType::Int64 => run_physical::<Int64Type>(array, &logical)?,
                    other => {
                        return Err(format!("unsupported run end type in unnest column: {other:?}"));
                    }
                };
                Self::decode_base(&values, Some(physical), None)
            }
            _ => Self::decode_base(array, None, None),
        }
    }

    fn decode_base(
        base: &ArrayRef,
        indices: Option<Vec<usize>>,
        outer_nulls: Option<NullBuffer>,
    ) -> Result<Self, String> {
        let (offsets, children) = match base.data_type() {
            DataType::List(_) => {
                let list = base.as_list::<i32>();
                (
                    Offsets::Small(list.offsets().clone()),
                    Children::Elements(Arc::clone(list.values())),
                )
            }
            DataType::LargeList(_) => {
                let list = base.as_list::<i64>();
                (
                    Offsets::Large(list.offsets().clone()),
                    Children::Elements(Arc::clone(list.values())),
                )
            }
            DataType::Map(_, _) => {
                let map = base.as_map();
                (
                    Offsets::Small(map.offsets().clone()),
                    Children::Entries {
                        keys: Arc::clone(map.keys()),
                        values: Arc::clone(map.values()),
                    },
                )
            }
            other => {
                return Err(format!(
                    "unsupported: unnest operator supports only ARRAY and MAP types, got {other:?}"
                ));
            }
        };
        Ok(Self {
            base: Arc::clone(base),
            offsets,
            children,
            indices,
            outer_nulls,
        })
    }

    fn base_index(&self, row: usize) -> usize {
        match self.indices.as_ref() {
            Some(indices) => indices[row],
            None => row,
        }
    }

    pub(crate) fn is_null(&self, row: usize) -> bool {
        if self.outer_nulls.as_ref().is_some_and(|n| n.is_null(row)) {
            return true;
        }
        self.base.is_null(self.base_index(row))
    }

    /// Element count of `row`; zero for a null row.
    pub(crate) fn size_at(&self, row: usize) -> usize {
        if self.is_null(row) {
            return 0;
        }
        self.offsets.start_and_len(self.base_index(row)).1
    }

    pub(crate) fn offset_at(&self, row: usize) -> usize {
        self.offsets.start_and_len(self.base_index(row)).0
    }

    pub(crate) fn elements(&self) -> Option<&ArrayRef> {
        match &self.children {
            Children::Elements(elements) => Some(elements),
            Children::Entries { .. } => None,
        }
    }

    pub(crate) fn entries(&self) -> Option<(&ArrayRef, &ArrayRef)> {
        match &self.children {
            Children::Entries { keys, values } => Some((keys, values)),
            Children::Elements(_) => None,
        }
    }
}

fn run_physical<R: arrow::datatypes::RunEndIndexType>(
    array: &ArrayRef,
    logical: &[u32],
) -> Result<(ArrayRef, Vec<usize>), String> {
    let run = array
        .as_run_opt::<R>()
        .ok_or_else(|| "unnest run-end column downcast failed".to_string())?;
    let physical = run
        .get_physical_indices(logical)
        .map_err(|e| format!("resolve run-end indices failed: {e}"))?;
    Ok((Arc::clone(run.values()), physical))
}

/// Which element of a child array lands in each output row.
#[derive(Clone, Debug)]
pub(crate) enum ElementMapping {
    /// Output rows are exactly `child[offset..offset + len]`.
    Identity { offset: usize, len: usize },
    /// Gather indices; null entries pad the output with nulls.
    Indices(UInt32Array),
}

impl ElementMapping {
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Identity { len, .. } => *len,
            Self::Indices(indices) => indices.len(),
        }
    }

    fn index_at(&self, pos: usize) -> Option<usize> {
        match self {
            Self::Identity { offset, .. } => Some(offset + pos),
            Self::Indices(indices) => {
                (!indices.is_null(pos)).then(|| indices.value(pos) as usize)
            }
        }
    }

    pub(crate) fn apply(&self, child: &ArrayRef) -> Result<ArrayRef, String> {
        match self {
            Self::Identity { offset, len } => Ok(child.slice(*offset, *len)),
            Self::Indices(indices) => take(child.as_ref(), indices, None)
                .map_err(|e| format!("unnest gather elements failed: {e}")),
        }
    }
}

/// Build the element mapping of one unnest column over input rows `rows`.
///
/// Each row contributes `max_sizes[row]` output rows: its own elements followed by nulls up to
/// the row's maximum across unnest columns. Contiguous unpadded rows collapse to an identity
/// slice.
pub(crate) fn build_element_mapping(
    column: &DecodedUnnestColumn,
    rows: std::ops::Range<usize>,
    max_sizes: &[usize],
    num_elements: usize,
) -> Result<ElementMapping, String> {
    let mut identity = true;
    let mut base: Option<usize> = None;
    let mut produced = 0usize;
    for row in rows.clone() {
        let max = max_sizes[row];
        if column.is_null(row) {
            if max > 0 {
                identity = false;
                break;
            }
            continue;
        }
        let offset = column.offset_at(row);
        let size = column.size_at(row);
        let start = *base.get_or_insert(offset);
        if size < max || (size > 0 && offset != start + produced) {
            identity = false;
            break;
        }
        produced += size;
    }
    if identity
        && let Some(offset) = base
        && produced == num_elements
    {
        return Ok(ElementMapping::Identity {
            offset,
            len: num_elements,
        });
    }
    if num_elements == 0 {
        return Ok(ElementMapping::Identity { offset: 0, len: 0 });
    }

    let mut builder = UInt32Builder::with_capacity(num_elements);
    for row in rows {
        let max = max_sizes[row];
        let mut size = 0;
        if !column.is_null(row) {
            let offset = column.offset_at(row);
            size = column.size_at(row);
            for idx in offset..offset + size {
                builder.append_value(element_index(idx)?);
            }
        }
        builder.append_nulls(max - size);
    }
    let indices = builder.finish();
    if indices.len() != num_elements {
        return Err(format!(
            "unnest element count mismatch: expected={} produced={}",
            num_elements,
            indices.len()
        ));
    }
    Ok(ElementMapping::Indices(indices))
}

/// Repeat index for replicated columns: row `r` appears `max_sizes[r]` times.
pub(crate) fn build_repeat_indices(
    rows: std::ops::Range<usize>,
    max_sizes: &[usize],
    num_elements: usize,
) -> Result<UInt32Array, String> {
    let mut builder = UInt32Builder::with_capacity(num_elements);
    for row in rows {
        let idx = element_index(row)?;
        for _ in 0..max_sizes[row] {
            builder.append_value(idx);
        }
    }
    Ok(builder.finish())
}

fn element_index(idx: usize) -> Result<u32, String> {
    u32::try_from(idx).map_err(|_| format!("unnest element index {idx} exceeds u32 range"))
}

/// Split struct elements into one column per field.
///
/// The unnest mapping, the element dictionary (if any) and struct-level nulls are composed into
/// one gather so each field is copied once.
pub(crate) fn split_struct_elements(
    elements: &ArrayRef,
    mapping: &ElementMapping,
) -> Result<Vec<ArrayRef>, String> {
    let (structs, dict_keys, dict_key_nulls) = match elements.data_type() {
        DataType::Struct(_) => (elements.as_struct().clone(), None, None),
        DataType::Dictionary(_, value_type) if matches!(value_type.as_ref(), DataType::Struct(_)) => {
            let dict = elements
                .as_any_dictionary_opt()
                .ok_or_else(|| "unnest struct dictionary downcast failed".to_string())?;
            (
                dict.values().as_struct().clone(),
                Some(dict.normalized_keys()),
                dict.keys().logical_nulls(),
            )
        }
        other => {
            return Err(format!(
                "unnest array of rows requires struct elements, got {other:?}"
            ));
        }
    };
    let composed = compose_struct_mapping(
        mapping,
        &structs,
        dict_keys.as_deref(),
        dict_key_nulls.as_ref(),
    )?;
    structs
        .columns()
        .iter()
        .map(|field| composed.apply(field))
        .collect()
}

fn compose_struct_mapping(
    mapping: &ElementMapping,
    structs: &StructArray,
    dict_keys: Option<&[usize]>,
    dict_key_nulls: Option<&NullBuffer>,
) -> Result<ElementMapping, String> {
    if dict_keys.is_none() && structs.null_count() == 0 {
        return Ok(mapping.clone());
    }
    let mut builder = UInt32Builder::with_capacity(mapping.len());
    for pos in 0..mapping.len() {
        let resolved = mapping.index_at(pos).and_then(|element| match dict_keys {
            Some(keys) => {
                if dict_key_nulls.is_some_and(|n| n.is_null(element)) {
                    None
                } else {
                    Some(keys[element])
                }
            }
            None => Some(element),
        });
        match resolved {
            Some(idx) if !structs.is_null(idx) => builder.append_value(element_index(idx)?),
            _ => builder.append_null(),
        }
    }
    Ok(ElementMapping::Indices(builder.finish()))
}
