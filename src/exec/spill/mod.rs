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
//! Spill hook points.
//!
//! The spill machinery itself lives outside this crate. Operators only publish whether their
//! storage may currently be reclaimed: while a [`NonReclaimableSectionGuard`] is alive the
//! owning operator is mutating storage and an external reclaimer must not touch it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "storage is being mutated" flag read by the external reclaimer.
#[derive(Clone, Debug, Default)]
pub struct NonReclaimableSection {
    flag: Arc<AtomicBool>,
}

impl NonReclaimableSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Mark the section active until the returned guard drops.
    ///
    /// Sections do not nest: entering while already active is a logic error.
    pub fn enter(&self) -> Result<NonReclaimableSectionGuard, String> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err("non-reclaimable section entered twice".to_string());
        }
        Ok(NonReclaimableSectionGuard {
            flag: Arc::clone(&self.flag),
        })
    }
}

#[derive(Debug)]
pub struct NonReclaimableSectionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for NonReclaimableSectionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
