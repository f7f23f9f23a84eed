// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Submission trace capture
//!
//! When tracing is enabled the execution bridge appends one [`TraceRecord`]
//! per submission. A trace can be written to disk and loaded back for
//! inspection.
//!
//! # Trace Format
//!
//! Traces are serialized with bincode, standard configuration. The file
//! starts with a format version; loading a trace with a different version
//! fails.
//!
//! # Example
//!
//! ```no_run
//! use gemkit::core::trace::SubmissionTrace;
//!
//! let trace = SubmissionTrace::load_from_file("run.trace").unwrap();
//! for record in &trace.records {
//!     println!("{:?} {} bytes", record.engine, record.batch_len);
//! }
//! ```

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bincode::{config, Decode, Encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{GemError, Result};
use crate::core::exec::Engine;

/// Trace format version
///
/// Increment whenever the layout of [`SubmissionTrace`] changes.
pub const TRACE_VERSION: u32 = 1;

/// Kernel verdict on one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum TraceOutcome {
    Accepted,
    /// Rejected with the given errno
    Rejected(i32),
}

/// One recorded submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[bincode(encode_bounds = "", decode_bounds = "")]
pub struct TraceRecord {
    #[bincode(with_serde)]
    pub timestamp: DateTime<Utc>,

    pub seqno: u64,

    #[bincode(with_serde)]
    pub engine: Engine,

    /// Raw flags word of the final attempt
    pub flags: u64,

    pub batch_len: u32,

    /// Object handles in submission order
    pub handles: Vec<u32>,

    /// Relocations sent with the final attempt
    pub relocation_count: u32,

    /// Relocations resolved locally before submission
    pub locally_patched: u32,

    /// The optimistic attempt was rejected and resubmitted
    pub retried: bool,

    pub outcome: TraceOutcome,
}

/// Ordered list of submissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[bincode(encode_bounds = "", decode_bounds = "")]
pub struct SubmissionTrace {
    pub version: u32,

    #[bincode(with_serde)]
    pub started: DateTime<Utc>,

    pub records: Vec<TraceRecord>,
}

impl Default for SubmissionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionTrace {
    pub fn new() -> Self {
        Self {
            version: TRACE_VERSION,
            started: Utc::now(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TraceRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Submissions that needed the full-relocation retry
    pub fn retried(&self) -> usize {
        self.records.iter().filter(|r| r.retried).count()
    }

    /// Save trace to file
    ///
    /// # Arguments
    ///
    /// * `path` - Destination file, created or truncated
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = config::standard();
        let encoded =
            bincode::encode_to_vec(self, config).map_err(|e| GemError::Trace(e.to_string()))?;
        let mut file = File::create(path)?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Load trace from file
    ///
    /// # Errors
    ///
    /// `GemError::Trace` if the file does not decode or carries another
    /// format version.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let config = config::standard();
        let (trace, _): (SubmissionTrace, usize) = bincode::decode_from_slice(&buffer, config)
            .map_err(|e| GemError::Trace(e.to_string()))?;

        if trace.version != TRACE_VERSION {
            return Err(GemError::Trace(format!(
                "Incompatible trace version: expected {}, got {}",
                TRACE_VERSION, trace.version
            )));
        }

        Ok(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seqno: u64, retried: bool, outcome: TraceOutcome) -> TraceRecord {
        TraceRecord {
            timestamp: Utc::now(),
            seqno,
            engine: Engine::Blt,
            flags: 3,
            batch_len: 64,
            handles: vec![1, 2, 3],
            relocation_count: 2,
            locally_patched: 0,
            retried,
            outcome,
        }
    }

    #[test]
    fn test_new_trace() {
        let trace = SubmissionTrace::new();
        assert_eq!(trace.version, TRACE_VERSION);
        assert!(trace.is_empty());
        assert_eq!(trace.retried(), 0);
    }

    #[test]
    fn test_retried_count() {
        let mut trace = SubmissionTrace::new();
        trace.push(record(1, false, TraceOutcome::Accepted));
        trace.push(record(2, true, TraceOutcome::Accepted));
        trace.push(record(3, false, TraceOutcome::Rejected(22)));
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.retried(), 1);
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.trace");

        let mut trace = SubmissionTrace::new();
        trace.push(record(1, false, TraceOutcome::Accepted));
        trace.push(record(2, true, TraceOutcome::Rejected(22)));
        trace.save_to_file(&path).unwrap();

        let loaded = SubmissionTrace::load_from_file(&path).unwrap();
        assert_eq!(loaded, trace);
        assert_eq!(loaded.records[1].outcome, TraceOutcome::Rejected(22));
    }

    #[test]
    fn test_version_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.trace");

        let mut trace = SubmissionTrace::new();
        trace.version = TRACE_VERSION + 1;
        trace.save_to_file(&path).unwrap();

        let result = SubmissionTrace::load_from_file(&path);
        assert!(matches!(result, Err(GemError::Trace(_))));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.trace");
        std::fs::write(&path, [0xffu8; 3]).unwrap();

        assert!(SubmissionTrace::load_from_file(&path).is_err());
    }
}
