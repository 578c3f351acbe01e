//! Criteria, instructions and mutation actions loaded from the JSON rule file.

pub mod action;
pub mod criteria;
pub mod instruction;
pub mod instruction_set;
pub mod reader;

pub use action::{Clause, ClauseValue, FuzzAction, PacketRule, ValueRange};
pub use criteria::{AddrSide, CriteriaSet, Criterion};
pub use instruction::Instruction;
pub use instruction_set::{ActionDispatch, InstructionSet};
pub use reader::{load_instruction_set, parse_instruction_set};

use thiserror::Error;

/// Default name of the rule file.
pub const DEFAULT_RULES_FILE: &str = "fuzzer_instr.json";

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Malformed rule JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid rule configuration: {0}")]
    Configuration(String),
    #[error("Invalid rule value: {0}")]
    Validation(String),
    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
}
