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
//! Streaming partition build for rank-like window functions.
//!
//! Responsibilities:
//! - Stores pre-sorted input rows and splits them into partitions on partition-key changes.
//! - Publishes each batch's run of rows to its partition as soon as the batch is consumed, so a
//!   reader can evaluate a partition before all of its rows have arrived.
//!
//! Key exported interfaces:
//! - Types: `RankLikeWindowBuild`.
//!
//! Current limitations:
//! - Input must already be ordered by partition keys then sort keys; no re-sorting happens here.

use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};

use crate::common::logging::debug;
use crate::exec::chunk::Chunk;
use crate::exec::row_container::{KeyKind, KeyProjection, RowAddress, RowContainer};
use crate::exec::spill::NonReclaimableSection;
use crate::exec::window::window_partition::{WindowPartition, WindowPartitionView};
use crate::runtime::mem_tracker::MemTracker;

pub struct RankLikeWindowBuild {
    data: RowContainer,
    // Each entry is one batch-local run of rows; every run belongs to exactly one partition.
    sorted_rows: Vec<Vec<RowAddress>>,
    window_partitions: Vec<WindowPartition>,
    // Rows of the partition being filled that arrived in the current input batch.
    input_rows: Vec<RowAddress>,
    previous_row: Option<RowAddress>,
    input_current_partition: usize,
    current_partition_rows: usize,
    output_current_partition: Option<usize>,
    no_more_input: bool,
    non_reclaimable: NonReclaimableSection,
}

impl RankLikeWindowBuild {
    pub fn try_new(
        input_schema: &Schema,
        partition_key: KeyProjection,
        sort_key: KeyProjection,
        mem_tracker: Option<Arc<MemTracker>>,
    ) -> Result<Self, String> {
        let data = RowContainer::try_new(input_schema, partition_key, sort_key, mem_tracker)?;
        Ok(Self {
            data,
            sorted_rows: Vec::new(),
            window_partitions: Vec::new(),
            input_rows: Vec::new(),
            previous_row: None,
            input_current_partition: 0,
            current_partition_rows: 0,
            output_current_partition: None,
            no_more_input: false,
            non_reclaimable: NonReclaimableSection::new(),
        })
    }

    /// Schema of the stored rows as gathered back from partitions.
    pub fn schema(&self) -> SchemaRef {
        self.data.schema()
    }

    /// Flag an external reclaimer consults before touching this build's storage.
    pub fn non_reclaimable_section(&self) -> NonReclaimableSection {
        self.non_reclaimable.clone()
    }

    pub fn add_input(&mut self, chunk: &Chunk) -> Result<(), String> {
        if self.no_more_input {
            return Err("window build received input after no_more_input".to_string());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        let _guard = self.non_reclaimable.enter()?;
        let addresses = self.data.store_chunk(chunk)?;

        for addr in addresses {
            if let Some(prev) = self.previous_row
                && self.data.rows_differ(prev, addr, KeyKind::Partition)
            {
                self.build_next_input_or_partition(true)?;
            }
            self.current_partition_rows = self
                .current_partition_rows
                .checked_add(1)
                .ok_or_else(|| "window partition row count overflow".to_string())?;
            self.input_rows.push(addr);
            self.previous_row = Some(addr);
        }
        self.build_next_input_or_partition(false)
    }

    /// Close the partition currently being filled. A build that never saw a row has nothing to
    /// close.
    pub fn no_more_input(&mut self) -> Result<(), String> {
        if self.no_more_input {
            return Ok(());
        }
        self.no_more_input = true;
        if let Some(last) = self.window_partitions.get_mut(self.input_current_partition)
            && !last.is_finished()
        {
            last.set_total_rows(self.current_partition_rows)?;
            last.set_finished()?;
        }
        debug!(
            "window build input finished: partitions={} rows={} bytes={}",
            self.window_partitions.len(),
            self.data.num_rows(),
            self.data.reserved_bytes()
        );
        Ok(())
    }

    /// True when a partition exists beyond the read cursor, finished or not.
    pub fn has_next_partition(&self) -> bool {
        if self.window_partitions.is_empty() {
            return false;
        }
        match self.output_current_partition {
            None => true,
            Some(cursor) => cursor + 1 < self.window_partitions.len(),
        }
    }

    /// Advance the read cursor and return the partition it lands on.
    pub fn next_partition(&mut self) -> Result<WindowPartitionView<'_>, String> {
        if !self.has_next_partition() {
            return Err(format!(
                "no next window partition (cursor={:?}, partitions={})",
                self.output_current_partition,
                self.window_partitions.len()
            ));
        }
        let next = self.output_current_partition.map_or(0, |cursor| cursor + 1);
        self.output_current_partition = Some(next);
        self.partition(next)
            .ok_or_else(|| format!("window partition {next} missing"))
    }

    pub fn partition(&self, index: usize) -> Option<WindowPartitionView<'_>> {
        self.window_partitions
            .get(index)
            .map(|partition| WindowPartitionView::new(index, partition, &self.sorted_rows, &self.data))
    }

    pub fn num_partitions(&self) -> usize {
        self.window_partitions.len()
    }

    // Publish the batch-local run to the partition being filled; when `finish_partition` is set
    // also close that partition and move on to the next one.
    fn build_next_input_or_partition(&mut self, finish_partition: bool) -> Result<(), String> {
        let rows = std::mem::take(&mut self.input_rows);
        if !rows.is_empty() {
            let batch = self.sorted_rows.len();
            let num_rows = rows.len();
            self.sorted_rows.push(rows);
            if self.input_current_partition < self.window_partitions.len() {
                self.window_partitions[self.input_current_partition]
                    .insert_new_batch(batch, num_rows)?;
            } else {
                self.window_partitions
                    .push(WindowPartition::new(batch, num_rows));
            }
        }

        if finish_partition {
            let partition = self
                .window_partitions
                .get_mut(self.input_current_partition)
                .ok_or_else(|| {
                    format!(
                        "window partition {} closed before any row arrived",
                        self.input_current_partition
                    )
                })?;
            partition.set_total_rows(self.current_partition_rows)?;
            partition.set_finished()?;
            self.input_current_partition += 1;
            self.current_partition_rows = 0;
        }
        Ok(())
    }
}
