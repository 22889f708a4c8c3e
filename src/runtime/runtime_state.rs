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
use std::sync::Arc;

use crate::common::config;
use crate::runtime::mem_tracker::{self, MemTracker};

/// Per-fragment-instance execution context handed to every operator call.
///
/// Carries the query batch size and the memory tracker operators charge their buffers to.
#[derive(Clone, Debug, Default)]
pub struct RuntimeState {
    batch_size: Option<usize>,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl RuntimeState {
    pub fn new(batch_size: Option<usize>, mem_tracker: Option<Arc<MemTracker>>) -> Self {
        Self {
            batch_size,
            mem_tracker,
        }
    }

    /// State for a named query whose tracker hangs off the process tracker.
    pub fn for_query(label: &str, batch_size: Option<usize>, mem_limit: Option<i64>) -> Self {
        let process = mem_tracker::process_mem_tracker();
        let tracker = match mem_limit {
            Some(limit) => MemTracker::new_child_with_limit(label, limit, &process),
            None => MemTracker::new_child(label, &process),
        };
        Self::new(batch_size, Some(tracker))
    }

    /// Return the maximum row count per in-memory chunk/RecordBatch.
    ///
    /// The query batch size wins; otherwise `runtime.chunk_size` from config.
    pub fn chunk_size(&self) -> usize {
        self.batch_size
            .filter(|v| *v > 0)
            .unwrap_or_else(config::default_chunk_size)
            .max(1)
    }

    pub fn mem_tracker(&self) -> Option<Arc<MemTracker>> {
        self.mem_tracker.clone()
    }
}
