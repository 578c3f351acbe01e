//! Rule file parsing.
//!
//! ```json
//! {"instructions":[{"criteria":[{"packetType":"PACKET_IN","ethType":"ARP"}],
//!                   "matchLimit":10,
//!                   "actions":[{"intent":"mutate_field","fieldName":"arp_oper","range":[[1,2]]}]}]}
//! ```

use super::RuleError;
use super::action::{Clause, FuzzAction, PacketRule, ValueRange, check_disjoint};
use super::criteria::{AddrSide, CriteriaSet, Criterion};
use super::instruction::Instruction;
use super::instruction_set::InstructionSet;
use crate::ethernet::{EthType, MacAddress};
use crate::openflow::MessageType;
use log::info;
use num_bigint::BigUint;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::str::FromStr;

const DEFAULT_MUTATION_RATE_MULTIPLIER: f64 = 1.0;
const DEFAULT_RULE_ID: i64 = -1;

#[derive(Deserialize)]
struct RuleDocument {
    #[serde(default)]
    instructions: Vec<InstructionDoc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionDoc {
    #[serde(default)]
    criteria: Vec<Map<String, Value>>,
    match_limit: Option<i64>,
    #[serde(default)]
    actions: Vec<ActionDoc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionDoc {
    intent: String,
    include_header: Option<bool>,
    field_name: Option<String>,
    range: Option<Vec<[Number; 2]>>,
    enable_mutation: Option<bool>,
    mutation_rate_multiplier: Option<f64>,
    rule: Option<RuleDoc>,
}

#[derive(Deserialize)]
struct RuleDoc {
    id: Option<i64>,
    #[serde(default)]
    clauses: Vec<ClauseDoc>,
}

#[derive(Deserialize)]
struct ClauseDoc {
    field: String,
    range: Option<Vec<[Number; 2]>>,
    value: Option<Number>,
}

/// Parses a rule document into an [`InstructionSet`].
///
/// # Errors
/// * `RuleError::Json` when the text is not valid JSON or has the wrong shape.
/// * `RuleError::Configuration` for unknown intents or criteria and missing mandatory keys.
/// * `RuleError::Validation` for out-of-domain values such as inverted ranges.
pub fn parse_instruction_set(text: &str) -> Result<InstructionSet, RuleError> {
    let document: RuleDocument = serde_json::from_str(text)?;
    let instructions = document
        .instructions
        .into_iter()
        .map(instruction_from_doc)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InstructionSet::new(instructions))
}

pub fn load_instruction_set(path: &Path) -> Result<InstructionSet, RuleError> {
    let text = std::fs::read_to_string(path)?;
    let set = parse_instruction_set(&text)?;
    info!("Loaded {} instruction(s) from {:?}", set.len(), path);
    Ok(set)
}

fn instruction_from_doc(doc: InstructionDoc) -> Result<Instruction, RuleError> {
    let criteria = doc
        .criteria
        .iter()
        .map(criteria_set_from_map)
        .collect::<Result<Vec<_>, _>>()?;
    let actions = doc
        .actions
        .into_iter()
        .map(action_from_doc)
        .collect::<Result<Vec<_>, _>>()?;
    let match_limit = match doc.match_limit {
        Some(limit) if limit <= 0 => {
            return Err(RuleError::Validation(format!(
                "matchLimit must be greater than zero, got {limit}"
            )));
        }
        Some(limit) => Some(limit as u64),
        None => None,
    };
    Instruction::new(criteria, actions, match_limit)
}

fn criteria_set_from_map(map: &Map<String, Value>) -> Result<CriteriaSet, RuleError> {
    let mut criteria = Vec::with_capacity(map.len());
    for (key, value) in map {
        let text = value.as_str().ok_or_else(|| {
            RuleError::Configuration(format!("criterion '{key}' expects a string, got {value}"))
        })?;
        let criterion = match key.as_str() {
            "packetType" => Criterion::MessageType(
                MessageType::from_str(text).map_err(RuleError::Configuration)?,
            ),
            "ethType" => Criterion::EthType(
                EthType::from_str(text).map_err(|e| RuleError::Configuration(e.to_string()))?,
            ),
            "ethSrc" | "ethDst" => {
                let addr = MacAddress::from_str(text)
                    .map_err(|e| RuleError::Configuration(e.to_string()))?;
                let side = if key == "ethSrc" {
                    AddrSide::Source
                } else {
                    AddrSide::Destination
                };
                Criterion::EthAddr { side, addr }
            }
            other => {
                return Err(RuleError::Configuration(format!(
                    "unknown criterion '{other}'"
                )));
            }
        };
        criteria.push(criterion);
    }
    Ok(CriteriaSet::new(criteria))
}

fn action_from_doc(doc: ActionDoc) -> Result<FuzzAction, RuleError> {
    let include_header = doc.include_header.unwrap_or(false);
    let action = match doc.intent.to_ascii_lowercase().as_str() {
        "mutate_bytes" => FuzzAction::MutateBytes { include_header },
        "mutate_packet" => FuzzAction::MutatePacket { include_header },
        "mutate_field" => {
            let field_name = doc.field_name.ok_or_else(|| {
                RuleError::Configuration("mutate_field action requires 'fieldName'".to_string())
            })?;
            let ranges = match doc.range {
                Some(pairs) => ranges_from_pairs(&pairs)?,
                None => Vec::new(),
            };
            check_disjoint(&field_name, &ranges)?;
            FuzzAction::MutateField { field_name, ranges }
        }
        "mutate_packet_rule" => {
            let (rule_id, clauses) = match doc.rule {
                Some(rule) => (
                    rule.id.unwrap_or(DEFAULT_RULE_ID),
                    rule.clauses
                        .into_iter()
                        .map(clause_from_doc)
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => (DEFAULT_RULE_ID, Vec::new()),
            };
            FuzzAction::MutatePacketRule(PacketRule::new(
                rule_id,
                include_header,
                doc.enable_mutation.unwrap_or(false),
                doc.mutation_rate_multiplier
                    .unwrap_or(DEFAULT_MUTATION_RATE_MULTIPLIER),
                clauses,
            )?)
        }
        other => {
            return Err(RuleError::Configuration(format!(
                "unknown action intent '{other}'"
            )));
        }
    };
    Ok(action)
}

fn clause_from_doc(doc: ClauseDoc) -> Result<Clause, RuleError> {
    match (doc.range, doc.value) {
        (Some(pairs), _) => Clause::ranged(doc.field, ranges_from_pairs(&pairs)?),
        (None, Some(value)) => Ok(Clause::literal(doc.field, number_to_biguint(&value)?)),
        (None, None) => Err(RuleError::Configuration(format!(
            "clause on '{}' needs either 'range' or 'value'",
            doc.field
        ))),
    }
}

fn ranges_from_pairs(pairs: &[[Number; 2]]) -> Result<Vec<ValueRange>, RuleError> {
    pairs
        .iter()
        .map(|[min, max]| ValueRange::new(number_to_biguint(min)?, number_to_biguint(max)?))
        .collect()
}

fn number_to_biguint(number: &Number) -> Result<BigUint, RuleError> {
    BigUint::from_str(&number.to_string()).map_err(|_| {
        RuleError::Validation(format!("expected a non-negative integer, got {number}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::action::ClauseValue;
    use std::io::Write;

    const FULL_DOCUMENT: &str = r#"{
        "instructions": [
            {
                "criteria": [{"packetType": "packet_in", "ethType": "ARP"}, {"ethSrc": "02:00:00:00:00:01"}],
                "matchLimit": 3,
                "actions": [
                    {"intent": "MUTATE_FIELD", "fieldName": "arp_oper", "range": [[1, 1], [3, 4]]},
                    {"intent": "mutate_bytes"},
                    {"intent": "mutate_packet", "includeHeader": true},
                    {"intent": "mutate_packet_rule", "enableMutation": true, "mutationRateMultiplier": 2.5,
                     "rule": {"id": 12, "clauses": [
                        {"field": "cookie", "value": 340282366920938463463374607431768211455},
                        {"field": "priority", "range": [[0, 10]]}
                     ]}}
                ]
            },
            {"actions": [{"intent": "mutate_packet_rule"}]}
        ]
    }"#;

    #[test]
    fn parses_every_intent_and_criterion() {
        let set = parse_instruction_set(FULL_DOCUMENT).expect("document is valid");
        assert_eq!(set.len(), 2);

        let first = &set.instructions()[0];
        assert_eq!(first.match_limit(), Some(3));
        assert_eq!(first.criteria().len(), 2);
        assert_eq!(first.criteria()[0].criteria().len(), 2);
        assert_eq!(first.actions().len(), 4);
        assert!(matches!(
            &first.actions()[0],
            FuzzAction::MutateField { field_name, ranges } if field_name == "arp_oper" && ranges.len() == 2
        ));
        assert_eq!(
            first.actions()[1],
            FuzzAction::MutateBytes {
                include_header: false
            }
        );

        let FuzzAction::MutatePacketRule(rule) = &first.actions()[3] else {
            panic!("fourth action must be a packet rule");
        };
        assert_eq!(rule.rule_id, 12);
        assert!(rule.enable_mutation);
        assert_eq!(rule.mutation_rate_multiplier, 2.5);
        let expected_cookie = (BigUint::from(1u8) << 128) - BigUint::from(1u8);
        assert_eq!(rule.clauses[0].value, ClauseValue::Literal(expected_cookie));

        let second = &set.instructions()[1];
        assert_eq!(second.match_limit(), None);
        let FuzzAction::MutatePacketRule(defaults) = &second.actions()[0] else {
            panic!("expected packet rule");
        };
        assert_eq!(defaults.rule_id, -1);
        assert_eq!(defaults.mutation_rate_multiplier, 1.0);
        assert!(!defaults.enable_mutation);
    }

    #[test]
    fn unknown_intent_is_a_configuration_error() {
        let err = parse_instruction_set(r#"{"instructions":[{"actions":[{"intent":"drop"}]}]}"#)
            .unwrap_err();
        assert!(matches!(err, RuleError::Configuration(msg) if msg.contains("drop")));
    }

    #[test]
    fn mutate_field_requires_field_name() {
        let err =
            parse_instruction_set(r#"{"instructions":[{"actions":[{"intent":"mutate_field"}]}]}"#)
                .unwrap_err();
        assert!(matches!(err, RuleError::Configuration(_)));
    }

    #[test]
    fn inverted_range_is_a_validation_error() {
        let text = r#"{"instructions":[{"actions":[
            {"intent":"mutate_field","fieldName":"xid","range":[[9,2]]}]}]}"#;
        assert!(matches!(
            parse_instruction_set(text),
            Err(RuleError::Validation(_))
        ));
    }

    #[test]
    fn overlapping_ranges_are_a_validation_error() {
        let field = r#"{"instructions":[{"actions":[
            {"intent":"mutate_field","fieldName":"xid","range":[[0,5],[5,9]]}]}]}"#;
        assert!(matches!(
            parse_instruction_set(field),
            Err(RuleError::Validation(_))
        ));
        let clause = r#"{"instructions":[{"actions":[{"intent":"mutate_packet_rule",
            "rule":{"clauses":[{"field":"reason","range":[[0,9],[2,3]]}]}}]}]}"#;
        assert!(matches!(
            parse_instruction_set(clause),
            Err(RuleError::Validation(_))
        ));
    }

    #[test]
    fn bad_values_are_rejected() {
        let zero_limit = r#"{"instructions":[{"matchLimit":0,"actions":[]}]}"#;
        assert!(matches!(
            parse_instruction_set(zero_limit),
            Err(RuleError::Validation(_))
        ));
        let negative = r#"{"instructions":[{"actions":[
            {"intent":"mutate_field","fieldName":"xid","range":[[-1,2]]}]}]}"#;
        assert!(matches!(
            parse_instruction_set(negative),
            Err(RuleError::Validation(_))
        ));
        let unknown_criterion = r#"{"instructions":[{"criteria":[{"vlan":"1"}]}]}"#;
        assert!(matches!(
            parse_instruction_set(unknown_criterion),
            Err(RuleError::Configuration(_))
        ));
        assert!(matches!(
            parse_instruction_set("{not json"),
            Err(RuleError::Json(_))
        ));
    }

    #[test]
    fn loads_rules_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"instructions":[{{"criteria":[{{"packetType":"ECHO_REQUEST"}}],"actions":[{{"intent":"mutate_bytes"}}]}}]}}"#
        )
        .unwrap();
        let set = load_instruction_set(file.path()).expect("rule file must load");
        assert_eq!(set.len(), 1);
        assert!(matches!(
            load_instruction_set(Path::new("/definitely/missing/rules.json")),
            Err(RuleError::Io(_))
        ));
    }
}
