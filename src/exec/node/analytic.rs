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
use arrow::datatypes::SchemaRef;

use crate::common::ids::SlotId;

/// One column of a partition or sort key projection.
#[derive(Clone, Debug)]
pub struct SortKeyColumn {
    pub slot: SlotId,
    pub asc: bool,
    pub nulls_first: bool,
}

impl SortKeyColumn {
    pub fn asc(slot: SlotId) -> Self {
        Self {
            slot,
            asc: true,
            nulls_first: true,
        }
    }

    pub fn desc(slot: SlotId) -> Self {
        Self {
            slot,
            asc: false,
            nulls_first: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankFunctionKind {
    RowNumber,
    Rank,
    DenseRank,
}

#[derive(Clone, Debug)]
pub struct RankFunctionCall {
    pub kind: RankFunctionKind,
    pub output_slot: SlotId,
}

/// Window node whose functions only need rows seen so far in the current partition.
///
/// The input is already sorted by partition keys then sort keys.
#[derive(Clone, Debug)]
pub struct RankWindowNode {
    pub node_id: i32,
    pub input_schema: SchemaRef,
    pub partition_keys: Vec<SortKeyColumn>,
    pub sort_keys: Vec<SortKeyColumn>,
    pub functions: Vec<RankFunctionCall>,
}
