pub mod config;
pub mod ethernet;
pub mod extractor;
pub mod fuzzer;
pub mod mutator;
pub mod openflow;
pub mod proxy;
pub mod report;
pub mod rules;
pub mod structure;

#[cfg(test)]
mod test_support;

pub use config::{FlowFuzzConfig, FuzzDirection};
pub use extractor::{ExtractError, extract, extract_ethernet};
pub use fuzzer::{FuzzContext, FuzzError, StreamFuzzer};
pub use mutator::{Mutation, MutationError, MutationKind, Mutator};
pub use openflow::{DecodeError, MessageType, OfMessage, OfVersion};
pub use proxy::{ProxySession, SessionOptions};
pub use report::{Report, ReportError};
pub use rules::{ActionDispatch, FuzzAction, InstructionSet, RuleError};
pub use structure::{Field, PacketStructure, StructureError};
