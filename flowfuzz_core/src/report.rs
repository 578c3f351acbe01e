//! Provenance record of one fuzzed message.

use crate::mutator::Mutation;
use crate::rules::FuzzAction;
use crate::structure::{Field, PacketStructure};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use log::{debug, error};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const REPORT_FILE_NAME: &str = "fuzz_report.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write report to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub action: serde_json::Value,
    pub mutations: Vec<Mutation>,
}

/// Built while a message is being fuzzed: [`Report::start`] snapshots the input,
/// [`Report::record`] appends one entry per applied action, [`Report::finish`] seals it.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    id: String,
    start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<i64>,
    packet_struct: Vec<Field>,
    initial_packet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_packet: Option<String>,
    fuzz_actions: Vec<ActionRecord>,
}

impl Report {
    pub fn start(initial: &[u8], structure: Option<&PacketStructure>) -> Self {
        Self {
            id: format!("{:x}", md5::compute(initial)),
            start_time: Utc::now().timestamp_millis(),
            end_time: None,
            packet_struct: structure.map(|s| s.fields().to_vec()).unwrap_or_default(),
            initial_packet: STANDARD.encode(initial),
            final_packet: None,
            fuzz_actions: Vec::new(),
        }
    }

    pub fn record(&mut self, action: &FuzzAction, mutations: Vec<Mutation>) {
        self.fuzz_actions.push(ActionRecord {
            action: action.to_json(),
            mutations,
        });
    }

    /// Stamps the end time and the final bytes. Later calls are ignored.
    pub fn finish(&mut self, final_packet: &[u8]) {
        if self.end_time.is_some() {
            return;
        }
        self.end_time = Some(Utc::now().timestamp_millis());
        self.final_packet = Some(STANDARD.encode(final_packet));
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn actions(&self) -> &[ActionRecord] {
        &self.fuzz_actions
    }

    pub fn mutation_count(&self) -> usize {
        self.fuzz_actions.iter().map(|a| a.mutations.len()).sum()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report to `<dir>/fuzz_report.json`, replacing any previous one.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        let path = dir.join(REPORT_FILE_NAME);
        let json = self.to_json()?;
        std::fs::write(&path, json).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Like [`Report::write_to`], but only logs failures.
    pub fn persist(&self, dir: &Path) {
        match self.write_to(dir) {
            Ok(path) => debug!("Report {} written to {:?}", self.id, path),
            Err(e) => error!("Report {} could not be persisted: {}", self.id, e),
        }
    }
}
