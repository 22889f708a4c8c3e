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
use crate::common::app_config::config as vexec_app_config;

pub(crate) fn default_chunk_size() -> usize {
    vexec_app_config()
        .ok()
        .map(|c| c.runtime.chunk_size)
        .unwrap_or(4096)
        .max(1)
}

/// Preferred unnest output size; `None` defers to the runtime chunk size.
pub(crate) fn unnest_output_batch_rows() -> Option<usize> {
    vexec_app_config()
        .ok()
        .map(|c| c.runtime.unnest_output_batch_rows)
        .filter(|v| *v > 0)
}

pub(crate) fn window_build_mem_limit_bytes() -> Option<i64> {
    vexec_app_config()
        .ok()
        .map(|c| c.runtime.window_build_mem_limit_bytes)
        .filter(|v| *v > 0)
        .map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}
