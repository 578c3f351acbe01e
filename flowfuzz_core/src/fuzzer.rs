use crate::extractor::extract;
use crate::mutator::Mutator;
use crate::openflow::{DecodeError, HEADER_LEN, OfMessage, OfVersion, peek_header};
use crate::report::Report;
use crate::rules::{ActionDispatch, InstructionSet, RuleError, load_instruction_set};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FuzzError {
    #[error("Declared message length {length} at offset {offset} is shorter than the header")]
    Framing { offset: usize, length: usize },
    #[error("Failed to decode message: {0}")]
    Decode(#[from] DecodeError),
}

/// State shared by every stream of a proxy: the expected protocol version and the live
/// instruction set. Cloning shares the same instruction set.
#[derive(Debug, Clone)]
pub struct FuzzContext {
    version: OfVersion,
    instructions: Arc<Mutex<InstructionSet>>,
    report_dir: Option<PathBuf>,
}

impl FuzzContext {
    pub fn new(version: OfVersion, instructions: InstructionSet) -> Self {
        Self {
            version,
            instructions: Arc::new(Mutex::new(instructions)),
            report_dir: None,
        }
    }

    /// Reports are only written when a directory is set.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn version(&self) -> OfVersion {
        self.version
    }

    pub fn report_dir(&self) -> Option<&Path> {
        self.report_dir.as_deref()
    }

    /// Swaps in a new instruction set and returns the previous one.
    pub fn replace_instructions(&self, instructions: InstructionSet) -> InstructionSet {
        let previous = std::mem::replace(&mut *self.instructions.lock(), instructions);
        info!(
            "Instruction set replaced ({} -> {} instruction(s))",
            previous.len(),
            self.instructions.lock().len()
        );
        previous
    }

    /// Loads the rule file at `path` and swaps it in, keeping the auto-filter setting.
    /// On failure the current set stays active.
    pub fn reload_from(&self, path: &Path) -> Result<(), RuleError> {
        let loaded = match load_instruction_set(path) {
            Ok(set) => set,
            Err(e) => {
                warn!("Reload of {path:?} failed, keeping current instructions: {e}");
                return Err(e);
            }
        };
        let auto_filter = self.instructions.lock().auto_filter();
        self.replace_instructions(loaded.with_auto_filter(auto_filter));
        Ok(())
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.lock().len()
    }

    pub fn instructions_json(&self) -> serde_json::Value {
        self.instructions.lock().to_json()
    }

    fn dispatch(&self, msg: &OfMessage) -> ActionDispatch {
        self.instructions.lock().actions_for(msg)
    }
}

/// Fuzzes one direction of an OpenFlow stream, chunk by chunk.
///
/// Messages are located by their header inside each chunk. A chunk is forwarded untouched
/// whenever it cannot be fully identified, so a message split across two reads is never
/// modified.
pub struct StreamFuzzer<R: Rng> {
    ctx: FuzzContext,
    rng: R,
    chunk_size: usize,
    label: String,
}

impl StreamFuzzer<ChaCha8Rng> {
    /// Deterministic when `seed` is set, otherwise seeded from the thread generator.
    pub fn seeded(ctx: FuzzContext, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        Self::new(ctx, rng)
    }
}

impl<R: Rng> StreamFuzzer<R> {
    pub fn new(ctx: FuzzContext, rng: R) -> Self {
        Self {
            ctx,
            rng,
            chunk_size: DEFAULT_CHUNK_SIZE,
            label: "stream".to_string(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(HEADER_LEN);
        self
    }

    /// Name used in log lines, e.g. the direction of the stream.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn context(&self) -> &FuzzContext {
        &self.ctx
    }

    /// Returns the bytes to forward for `chunk`: the fuzzed chunk, or the original on any
    /// failure.
    pub fn forward_chunk(&mut self, chunk: &[u8]) -> Vec<u8> {
        match self.interpret_and_fuzz(chunk) {
            Ok(Some(fuzzed)) => fuzzed,
            Ok(None) => chunk.to_vec(),
            Err(e) => {
                debug!("[{}] {e}, forwarding {} byte(s) untouched", self.label, chunk.len());
                chunk.to_vec()
            }
        }
    }

    /// Walks every message of `chunk` and fuzzes the ones matched by the instruction set.
    ///
    /// Returns `Ok(None)` when the chunk must be forwarded as is: no message was changed,
    /// or a message carries a version other than the configured one.
    pub fn interpret_and_fuzz(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, FuzzError> {
        let mut output: Option<Vec<u8>> = None;
        let mut offset = 0;
        while offset < chunk.len() {
            let rest = &chunk[offset..];
            let header = peek_header(rest).ok_or(DecodeError::Truncated {
                offset,
                needed: HEADER_LEN,
                available: rest.len(),
            })?;
            if header.version != self.ctx.version.wire() {
                debug!(
                    "[{}] Version byte {:#04x} at offset {} is not OpenFlow {}, passing chunk through",
                    self.label, header.version, offset, self.ctx.version
                );
                return Ok(None);
            }

            let length = header.length as usize;
            if length < HEADER_LEN {
                return Err(FuzzError::Framing { offset, length });
            }
            let raw = rest.get(..length).ok_or(DecodeError::Truncated {
                offset,
                needed: length,
                available: rest.len(),
            })?;
            let msg = OfMessage::decode(raw)?;

            if let Some(fuzzed) = self.fuzz_message(&msg, raw) {
                output.get_or_insert_with(|| chunk.to_vec())[offset..offset + length]
                    .copy_from_slice(&fuzzed);
            }
            offset += length;
        }
        Ok(output)
    }

    fn fuzz_message(&mut self, msg: &OfMessage, raw: &[u8]) -> Option<Vec<u8>> {
        let actions = match self.ctx.dispatch(msg) {
            ActionDispatch::NoMatch => {
                trace!("[{}] {} xid={} not matched", self.label, msg.msg_type, msg.xid);
                return None;
            }
            ActionDispatch::Matched(actions) if actions.is_empty() => {
                debug!("[{}] {} matched without actions", self.label, msg.msg_type);
                return None;
            }
            ActionDispatch::Matched(actions) => actions,
        };

        let structure = match extract(msg) {
            Ok(structure) => Some(structure),
            Err(e) => {
                warn!("[{}] No field layout for {}: {e}", self.label, msg.msg_type);
                None
            }
        };

        let mut buffer = raw.to_vec();
        let mut report = Report::start(raw, structure.as_ref());
        for action in &actions {
            if action.needs_structure() && structure.is_none() {
                warn!("[{}] Skipping {} on {}", self.label, action.intent(), action.target());
                continue;
            }
            // A failed action must not leave partial writes behind.
            let mut scratch = buffer.clone();
            match action.mutate(structure.as_ref(), &mut scratch, &mut self.rng) {
                Ok(mutations) => {
                    buffer = scratch;
                    debug!(
                        "[{}] {} on {} applied {} mutation(s)",
                        self.label,
                        action.intent(),
                        action.target(),
                        mutations.len()
                    );
                    report.record(action, mutations);
                }
                Err(e) => warn!(
                    "[{}] {} on {} failed: {e}",
                    self.label,
                    action.intent(),
                    action.target()
                ),
            }
        }
        report.finish(&buffer);

        info!(
            "[{}] Fuzzed {} xid={} ({} action(s), {} mutation(s))",
            self.label,
            msg.msg_type,
            msg.xid,
            report.actions().len(),
            report.mutation_count()
        );
        if let Some(dir) = self.ctx.report_dir() {
            report.persist(dir);
        }
        Some(buffer)
    }

    /// Copies `reader` to `writer` one chunk at a time, fuzzing along the way, until EOF or
    /// until `stop` is raised. Returns the number of bytes written.
    pub fn run<Rd: Read, W: Write>(
        &mut self,
        reader: &mut Rd,
        writer: &mut W,
        stop: &AtomicBool,
    ) -> io::Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        while !stop.load(Ordering::Relaxed) {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if stop.load(Ordering::Relaxed) => {
                    debug!("[{}] Read interrupted by shutdown: {e}", self.label);
                    break;
                }
                Err(e) => return Err(e),
            };
            let out = self.forward_chunk(&buf[..n]);
            writer.write_all(&out)?;
            writer.flush()?;
            written += out.len() as u64;
        }
        debug!("[{}] Stream closed after {written} byte(s)", self.label);
        Ok(written)
    }
}
