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
use std::ops::Range;

use arrow::array::ArrayRef;

use crate::exec::row_container::{KeyKind, RowAddress, RowContainer};

/// Rows of one partition, accumulated batch by batch.
///
/// Batches are indices into the build's sorted-row list. The partition stays readable while
/// open; `total_rows` and `finished` are set exactly once when the next partition starts or
/// input ends.
#[derive(Debug)]
pub struct WindowPartition {
    batches: Vec<usize>,
    num_rows: usize,
    total_rows: Option<usize>,
    finished: bool,
}

impl WindowPartition {
    pub(crate) fn new(first_batch: usize, rows: usize) -> Self {
        Self {
            batches: vec![first_batch],
            num_rows: rows,
            total_rows: None,
            finished: false,
        }
    }

    pub(crate) fn insert_new_batch(&mut self, batch: usize, rows: usize) -> Result<(), String> {
        if self.finished {
            return Err("cannot append rows to a finished window partition".to_string());
        }
        self.num_rows = self
            .num_rows
            .checked_add(rows)
            .ok_or_else(|| "window partition row count overflow".to_string())?;
        self.batches.push(batch);
        Ok(())
    }

    pub(crate) fn set_total_rows(&mut self, total_rows: usize) -> Result<(), String> {
        if let Some(existing) = self.total_rows {
            return Err(format!(
                "window partition total rows already set: existing={} new={}",
                existing, total_rows
            ));
        }
        if total_rows != self.num_rows {
            return Err(format!(
                "window partition total rows mismatch: counted={} appended={}",
                total_rows, self.num_rows
            ));
        }
        self.total_rows = Some(total_rows);
        Ok(())
    }

    pub(crate) fn set_finished(&mut self) -> Result<(), String> {
        if self.finished {
            return Err("window partition already finished".to_string());
        }
        if self.total_rows.is_none() {
            return Err("window partition finished before total rows were set".to_string());
        }
        self.finished = true;
        Ok(())
    }

    /// Rows appended so far.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn total_rows(&self) -> Option<usize> {
        self.total_rows
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }
}

/// Read access to one partition's rows in sorted order.
#[derive(Clone, Copy)]
pub struct WindowPartitionView<'a> {
    index: usize,
    partition: &'a WindowPartition,
    sorted_rows: &'a [Vec<RowAddress>],
    data: &'a RowContainer,
}

impl<'a> WindowPartitionView<'a> {
    pub(crate) fn new(
        index: usize,
        partition: &'a WindowPartition,
        sorted_rows: &'a [Vec<RowAddress>],
        data: &'a RowContainer,
    ) -> Self {
        Self {
            index,
            partition,
            sorted_rows,
            data,
        }
    }

    /// Position of this partition in build order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn num_rows(&self) -> usize {
        self.partition.num_rows()
    }

    pub fn total_rows(&self) -> Option<usize> {
        self.partition.total_rows()
    }

    pub fn is_finished(&self) -> bool {
        self.partition.is_finished()
    }

    pub fn row_at(&self, pos: usize) -> Option<RowAddress> {
        let mut remaining = pos;
        for batch in &self.partition.batches {
            let rows = &self.sorted_rows[*batch];
            if remaining < rows.len() {
                return Some(rows[remaining]);
            }
            remaining -= rows.len();
        }
        None
    }

    /// Addresses of the rows at positions `range`, in sorted order.
    pub fn rows(&self, range: Range<usize>) -> Result<Vec<RowAddress>, String> {
        if range.start > range.end || range.end > self.num_rows() {
            return Err(format!(
                "window partition row range {:?} out of bounds (num_rows={})",
                range,
                self.num_rows()
            ));
        }
        let mut out = Vec::with_capacity(range.len());
        let mut skip = range.start;
        for batch in &self.partition.batches {
            if out.len() == range.len() {
                break;
            }
            let rows = &self.sorted_rows[*batch];
            if skip >= rows.len() {
                skip -= rows.len();
                continue;
            }
            let take = (rows.len() - skip).min(range.len() - out.len());
            out.extend_from_slice(&rows[skip..skip + take]);
            skip = 0;
        }
        Ok(out)
    }

    /// True when the two rows are equal on the sort key.
    pub fn is_peer(&self, left: RowAddress, right: RowAddress) -> bool {
        !self.data.rows_differ(left, right, KeyKind::Sort)
    }

    pub fn gather_columns(&self, range: Range<usize>) -> Result<Vec<ArrayRef>, String> {
        let rows = self.rows(range)?;
        self.gather_rows(&rows)
    }

    pub fn gather_rows(&self, rows: &[RowAddress]) -> Result<Vec<ArrayRef>, String> {
        self.data.gather_columns(rows)
    }
}
