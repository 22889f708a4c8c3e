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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use tempfile::TempDir;

use novarocks_vexec::common::ids::SlotId;
use novarocks_vexec::exec::chunk::{Chunk, field_with_slot_id};
use novarocks_vexec::exec::pipeline::operator_factory::OperatorFactory;
use novarocks_vexec::novarocks_config;
use novarocks_vexec::novarocks_logging;
use novarocks_vexec::runtime::runtime_state::RuntimeState;

/// Chunk size written into the test config.
pub const TEST_CHUNK_SIZE: usize = 1024;
/// Unnest output row target written into the test config.
pub const TEST_UNNEST_OUTPUT_ROWS: usize = 3;

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks_vexec.toml");

        let config_content = format!(
            r#"
log_level = "debug"

[runtime]
chunk_size = {TEST_CHUNK_SIZE}
unnest_output_batch_rows = {TEST_UNNEST_OUTPUT_ROWS}
"#
        );
        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static novarocks_config::VexecConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// Load the shared test config once per test binary.
pub fn load_test_config() -> &'static novarocks_config::VexecConfig {
    let test_config = TestConfig::new().expect("Failed to create test config");
    test_config.load_config().expect("Failed to load config")
}

pub fn slot_field(name: &str, data_type: DataType, slot: u32) -> Field {
    field_with_slot_id(Field::new(name, data_type, true), SlotId::new(slot))
}

pub fn chunk_of(schema: &SchemaRef, columns: Vec<ArrayRef>) -> Chunk {
    Chunk::try_from_columns(Arc::clone(schema), columns).expect("chunk")
}

/// Push every chunk through a fresh operator, finish it and collect all output.
pub fn run_processor(
    factory: &dyn OperatorFactory,
    state: &RuntimeState,
    input: Vec<Chunk>,
) -> Vec<Chunk> {
    let mut op = factory.create(1, 0);
    let processor = op.as_processor_mut().expect("processor operator");
    let mut out = Vec::new();
    for chunk in input {
        while !processor.need_input() {
            match processor.pull_chunk(state).expect("pull_chunk") {
                Some(chunk) => out.push(chunk),
                None => break,
            }
        }
        processor.push_chunk(state, chunk).expect("push_chunk");
    }
    processor.set_finishing(state).expect("set_finishing");
    while let Some(chunk) = processor.pull_chunk(state).expect("pull_chunk") {
        out.push(chunk);
    }
    assert!(op.is_finished(), "operator should be finished after draining");
    out
}

/// Assert that a result is Ok and return the value.
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is Err.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => panic!("Expected Err, got Ok"),
            Err(e) => e,
        }
    };
}
