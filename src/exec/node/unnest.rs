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

/// Plan description of an unnest.
///
/// Output column order: replicated columns, then the flattened columns of every unnest slot in
/// declaration order (one per array, one per struct field when `unnest_array_of_rows` splits
/// an array of structs, two for a map), then the ordinality column when requested.
#[derive(Clone, Debug)]
pub struct UnnestNode {
    pub node_id: i32,
    pub input_schema: SchemaRef,
    pub replicate_slots: Vec<SlotId>,
    pub unnest_slots: Vec<SlotId>,
    pub with_ordinality: bool,
    pub unnest_array_of_rows: bool,
    pub output_schema: SchemaRef,
}
