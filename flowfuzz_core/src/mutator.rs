use crate::rules::{ClauseValue, FuzzAction, PacketRule, ValueRange};
use crate::structure::{Field, HEADER_FIELD_COUNT, PacketStructure, StructureError};
use log::{debug, warn};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::Rng;
use rand::seq::index;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use thiserror::Error;

/// Header span assumed by `mutate_bytes` when no field layout is available.
pub const FALLBACK_HEADER_LEN: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    #[error("Field '{0}' does not exist in the message")]
    FieldNotFound(String),
    #[error("Message has no field eligible for mutation")]
    NoEligibleFields,
    #[error("No byte left to mutate after skipping {skipped} header byte(s)")]
    EmptySpan { skipped: usize },
    #[error("No value of the requested ranges fits in field '{field}' (max {max})")]
    EmptyRange { field: String, max: BigUint },
    #[error("Action '{0}' needs the message layout, which could not be extracted")]
    MissingStructure(&'static str),
    #[error("Field layout does not fit the buffer: {0}")]
    Structure(#[from] StructureError),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationKind {
    RuleBasedMutation,
    UniformMutation,
    RandomMutation,
    FieldMutation,
    BytesMutation,
}

/// One applied change, as recorded in the fuzzing report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    #[serde(rename = "type")]
    pub kind: MutationKind,
    pub field: String,
    #[serde(serialize_with = "serialize_big")]
    pub initial_value: BigUint,
    #[serde(serialize_with = "serialize_big")]
    pub final_value: BigUint,
}

fn serialize_big<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    crate::rules::action::big_to_json(value).serialize(serializer)
}

/// A `Mutator` rewrites the bytes of one serialized message in place.
///
/// Implementations must never change the length of `buffer`; the caller splices the
/// result back into the stream at the original offset.
///
/// # Type Parameters
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<R: Rng + ?Sized> {
    /// Applies the mutation to `buffer`.
    ///
    /// # Arguments
    /// * `structure`: The field layout of the message in `buffer`, when it could be
    ///   extracted. Mutators that work field by field fail without it.
    /// * `buffer`: The serialized message, modified in place.
    /// * `rng`: A mutable reference to a random number generator.
    ///
    /// # Returns
    /// `Result<Vec<Mutation>, MutationError>`:
    ///   - `Ok(mutations)`: Every change that was applied, in order.
    ///   - `Err(error)`: Nothing usable was applied. The buffer may still hold changes
    ///     made before the failure.
    fn mutate(
        &self,
        structure: Option<&PacketStructure>,
        buffer: &mut [u8],
        rng: &mut R,
    ) -> Result<Vec<Mutation>, MutationError>;
}

impl<R: Rng + ?Sized> Mutator<R> for FuzzAction {
    fn mutate(
        &self,
        structure: Option<&PacketStructure>,
        buffer: &mut [u8],
        rng: &mut R,
    ) -> Result<Vec<Mutation>, MutationError> {
        let require = || structure.ok_or(MutationError::MissingStructure(self.intent()));
        match self {
            FuzzAction::MutateBytes { include_header } => {
                let skip = if *include_header {
                    0
                } else {
                    structure.map_or(FALLBACK_HEADER_LEN, PacketStructure::header_end)
                };
                mutate_bytes(buffer, skip, rng)
            }
            FuzzAction::MutatePacket { include_header } => {
                mutate_packet(require()?, buffer, *include_header, rng)
            }
            FuzzAction::MutateField { field_name, ranges } => {
                mutate_field(require()?, buffer, field_name, ranges, rng)
            }
            FuzzAction::MutatePacketRule(rule) => mutate_packet_rule(require()?, buffer, rule, rng),
        }
    }
}

/// Overwrites `buffer[skip..]` with fresh random bytes.
///
/// # Arguments
/// * `buffer`: The serialized message.
/// * `skip`: Number of leading bytes to leave untouched, usually the header length.
/// * `rng`: Random source.
///
/// # Returns
/// One `BYTES_MUTATION` whose values are the span read as a big-endian integer.
pub fn mutate_bytes<R: Rng + ?Sized>(
    buffer: &mut [u8],
    skip: usize,
    rng: &mut R,
) -> Result<Vec<Mutation>, MutationError> {
    let span = match buffer.get_mut(skip..) {
        Some(span) if !span.is_empty() => span,
        _ => return Err(MutationError::EmptySpan { skipped: skip }),
    };
    let initial_value = BigUint::from_bytes_be(span);
    rng.fill_bytes(span);
    let final_value = BigUint::from_bytes_be(span);
    Ok(vec![Mutation {
        kind: MutationKind::BytesMutation,
        field: format!("bytes[{}..{}]", skip, skip + span.len()),
        initial_value,
        final_value,
    }])
}

/// Mutates a single named field.
///
/// With `ranges` empty the new value is uniform over the whole field. Otherwise a range is
/// picked with probability proportional to how many values it holds, then a value is drawn
/// uniformly inside it. Ranges are first clipped to what the field can represent.
///
/// # Returns
/// One `FIELD_MUTATION`, or `FieldNotFound` / `EmptyRange`.
pub fn mutate_field<R: Rng + ?Sized>(
    structure: &PacketStructure,
    buffer: &mut [u8],
    field_name: &str,
    ranges: &[ValueRange],
    rng: &mut R,
) -> Result<Vec<Mutation>, MutationError> {
    let field = structure
        .get(field_name)
        .ok_or_else(|| MutationError::FieldNotFound(field_name.to_string()))?;
    let value = if ranges.is_empty() {
        random_below(&(field.max_value() + BigUint::one()), rng)
    } else {
        sample_in_ranges(field, ranges, rng)?
    };
    let mutation = apply(field, buffer, value, MutationKind::FieldMutation)?;
    Ok(vec![mutation])
}

/// Scrambles a random, non-empty subset of the fields.
///
/// The subset size is uniform in `[1, N]` over the eligible fields, and every chosen
/// field receives a value different from its current one.
pub fn mutate_packet<R: Rng + ?Sized>(
    structure: &PacketStructure,
    buffer: &mut [u8],
    include_header: bool,
    rng: &mut R,
) -> Result<Vec<Mutation>, MutationError> {
    let eligible = eligible_fields(structure, include_header);
    if eligible.is_empty() {
        return Err(MutationError::NoEligibleFields);
    }

    let amount = rng.random_range(1..=eligible.len());
    let picked = index::sample(rng, eligible.len(), amount);
    let mut mutations = Vec::with_capacity(amount);
    for i in picked.iter() {
        let field = &structure.fields()[eligible[i]];
        let current = field.read(buffer)?;
        let bound = field.max_value() + BigUint::one();
        // Every field holds at least two values, so this terminates.
        let value = loop {
            let candidate = random_below(&bound, rng);
            if candidate != current {
                break candidate;
            }
        };
        mutations.push(apply(field, buffer, value, MutationKind::RandomMutation)?);
    }
    Ok(mutations)
}

/// Applies every clause of `rule`, then optionally mutates the remaining fields.
///
/// Clause fields that are absent from the message are skipped. Clauses on header fields
/// apply whatever `include_header` says; that flag only limits the residual pool. Every
/// clause value is resolved before the first write, so a failing clause leaves `buffer`
/// untouched. When mutation is enabled, each field not named by a clause is redrawn
/// uniformly with probability `mutation_rate_multiplier / free_fields`.
pub fn mutate_packet_rule<R: Rng + ?Sized>(
    structure: &PacketStructure,
    buffer: &mut [u8],
    rule: &PacketRule,
    rng: &mut R,
) -> Result<Vec<Mutation>, MutationError> {
    let mut free: BTreeSet<usize> = eligible_fields(structure, rule.include_header)
        .into_iter()
        .collect();
    let mut assignments = Vec::with_capacity(rule.clauses.len());
    for clause in &rule.clauses {
        let Some(index) = structure.index_of(&clause.field) else {
            debug!("Rule {} names absent field '{}'", rule.rule_id, clause.field);
            continue;
        };
        let field = &structure.fields()[index];
        let max = field.max_value();
        let value = match &clause.value {
            ClauseValue::Literal(v) if *v > max => {
                warn!(
                    "Value {} does not fit in field '{}', clamping to {}",
                    v,
                    field.name(),
                    max
                );
                max
            }
            ClauseValue::Literal(v) => v.clone(),
            ClauseValue::Ranges(ranges) => sample_in_ranges(field, ranges, rng)?,
        };
        assignments.push((index, value));
    }

    let mut mutations = Vec::with_capacity(assignments.len());
    for (index, value) in assignments {
        let field = &structure.fields()[index];
        mutations.push(apply(field, buffer, value, MutationKind::RuleBasedMutation)?);
        free.remove(&index);
    }

    if rule.enable_mutation && !free.is_empty() {
        let rate = (rule.mutation_rate_multiplier / free.len() as f64).clamp(0.0, 1.0);
        for index in free {
            if !rng.random_bool(rate) {
                continue;
            }
            let field = &structure.fields()[index];
            let value = random_below(&(field.max_value() + BigUint::one()), rng);
            mutations.push(apply(field, buffer, value, MutationKind::UniformMutation)?);
        }
    }
    Ok(mutations)
}

/// Indices of non-empty fields, skipping the header fields unless `include_header`.
fn eligible_fields(structure: &PacketStructure, include_header: bool) -> Vec<usize> {
    let start = if include_header { 0 } else { HEADER_FIELD_COUNT };
    structure
        .iter()
        .enumerate()
        .skip(start)
        .filter(|(_, f)| f.length() > 0)
        .map(|(i, _)| i)
        .collect()
}

fn apply(
    field: &Field,
    buffer: &mut [u8],
    value: BigUint,
    kind: MutationKind,
) -> Result<Mutation, MutationError> {
    let initial_value = field.read(buffer)?;
    field.write(buffer, &value)?;
    Ok(Mutation {
        kind,
        field: field.name().to_string(),
        initial_value,
        final_value: field.read(buffer)?,
    })
}

/// Draws from the union of `ranges` clipped to the field, weighting each range by its
/// number of values.
fn sample_in_ranges<R: Rng + ?Sized>(
    field: &Field,
    ranges: &[ValueRange],
    rng: &mut R,
) -> Result<BigUint, MutationError> {
    let max = field.max_value();
    let clipped: Vec<(BigUint, BigUint)> = ranges
        .iter()
        .filter(|r| *r.min() <= max)
        .map(|r| (r.min().clone(), r.max().min(&max).clone()))
        .collect();
    if clipped.is_empty() {
        return Err(MutationError::EmptyRange {
            field: field.name().to_string(),
            max,
        });
    }

    let total: BigUint = clipped
        .iter()
        .map(|(lo, hi)| hi - lo + BigUint::one())
        .sum();
    let mut pick = random_below(&total, rng);
    for (lo, hi) in &clipped {
        let count = hi - lo + BigUint::one();
        if pick < count {
            return Ok(lo + pick);
        }
        pick -= count;
    }
    // `pick < total` guarantees a range was selected above.
    Ok(clipped[clipped.len() - 1].1.clone())
}

/// Uniform value in `[0, bound)`, by rejection sampling over the bit width of `bound`.
pub fn random_below<R: Rng + ?Sized>(bound: &BigUint, rng: &mut R) -> BigUint {
    if bound.is_zero() || bound.is_one() {
        return BigUint::zero();
    }
    let bits = (bound - BigUint::one()).bits();
    let byte_len = bits.div_ceil(8) as usize;
    let excess = (byte_len as u64 * 8 - bits) as u32;
    let mut bytes = vec![0u8; byte_len];
    loop {
        rng.fill_bytes(&mut bytes);
        bytes[0] &= 0xFF >> excess;
        let candidate = BigUint::from_bytes_be(&bytes);
        if &candidate < bound {
            return candidate;
        }
    }
}
