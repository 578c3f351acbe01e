use super::RuleError;
use num_bigint::BigUint;
use serde_json::{Map, Number, Value, json};
use std::str::FromStr;

/// Inclusive range of unsigned values. Construction rejects `min > max`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueRange {
    min: BigUint,
    max: BigUint,
}

impl ValueRange {
    pub fn new(min: BigUint, max: BigUint) -> Result<Self, RuleError> {
        if min > max {
            return Err(RuleError::Validation(format!(
                "range minimum {min} is greater than its maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn single(value: BigUint) -> Self {
        Self {
            min: value.clone(),
            max: value,
        }
    }

    pub fn min(&self) -> &BigUint {
        &self.min
    }

    pub fn max(&self) -> &BigUint {
        &self.max
    }

    pub fn contains(&self, value: &BigUint) -> bool {
        &self.min <= value && value <= &self.max
    }

    fn to_json(&self) -> Value {
        Value::Array(vec![big_to_json(&self.min), big_to_json(&self.max)])
    }
}

/// Rejects range lists in which any two ranges share a value.
pub fn check_disjoint(field: &str, ranges: &[ValueRange]) -> Result<(), RuleError> {
    let mut sorted: Vec<&ValueRange> = ranges.iter().collect();
    sorted.sort_by(|a, b| a.min.cmp(&b.min));
    for pair in sorted.windows(2) {
        if pair[1].min <= pair[0].max {
            return Err(RuleError::Validation(format!(
                "ranges [{}, {}] and [{}, {}] on '{field}' overlap",
                pair[0].min, pair[0].max, pair[1].min, pair[1].max
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClauseValue {
    Literal(BigUint),
    Ranges(Vec<ValueRange>),
}

/// A field constraint inside a rule-based mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub field: String,
    pub value: ClauseValue,
}

impl Clause {
    pub fn literal(field: impl Into<String>, value: BigUint) -> Self {
        Self {
            field: field.into(),
            value: ClauseValue::Literal(value),
        }
    }

    /// Fails when `ranges` is empty or two of its ranges overlap.
    pub fn ranged(field: impl Into<String>, ranges: Vec<ValueRange>) -> Result<Self, RuleError> {
        let field = field.into();
        if ranges.is_empty() {
            return Err(RuleError::Validation(format!(
                "clause on '{field}' has an empty range list"
            )));
        }
        check_disjoint(&field, &ranges)?;
        Ok(Self {
            field,
            value: ClauseValue::Ranges(ranges),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacketRule {
    pub rule_id: i64,
    pub include_header: bool,
    pub enable_mutation: bool,
    pub mutation_rate_multiplier: f64,
    pub clauses: Vec<Clause>,
}

impl PacketRule {
    pub fn new(
        rule_id: i64,
        include_header: bool,
        enable_mutation: bool,
        mutation_rate_multiplier: f64,
        clauses: Vec<Clause>,
    ) -> Result<Self, RuleError> {
        if !mutation_rate_multiplier.is_finite() || mutation_rate_multiplier < 0.0 {
            return Err(RuleError::Validation(format!(
                "mutationRateMultiplier must be a non-negative number, got {mutation_rate_multiplier}"
            )));
        }
        Ok(Self {
            rule_id,
            include_header,
            enable_mutation,
            mutation_rate_multiplier,
            clauses,
        })
    }
}

/// A mutation directive attached to an instruction.
///
/// Equality compares intent, target and parameters, which is what de-duplication of
/// matched actions relies on.
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzAction {
    MutateBytes { include_header: bool },
    MutatePacket { include_header: bool },
    MutateField {
        field_name: String,
        ranges: Vec<ValueRange>,
    },
    MutatePacketRule(PacketRule),
}

impl FuzzAction {
    pub fn intent(&self) -> &'static str {
        match self {
            FuzzAction::MutateBytes { .. } => "mutate_bytes",
            FuzzAction::MutatePacket { .. } => "mutate_packet",
            FuzzAction::MutateField { .. } => "mutate_field",
            FuzzAction::MutatePacketRule(_) => "mutate_packet_rule",
        }
    }

    pub fn target(&self) -> &str {
        match self {
            FuzzAction::MutateField { field_name, .. } => field_name,
            _ => "of_packet",
        }
    }

    /// Whether the action needs the message's field layout to run.
    pub fn needs_structure(&self) -> bool {
        !matches!(self, FuzzAction::MutateBytes { .. })
    }

    /// JSON description used in reports and logs.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("intent".into(), json!(self.intent()));
        obj.insert("target".into(), json!(self.target()));
        match self {
            FuzzAction::MutateBytes { include_header }
            | FuzzAction::MutatePacket { include_header } => {
                obj.insert("includeHeader".into(), json!(include_header));
            }
            FuzzAction::MutateField { field_name, ranges } => {
                obj.insert("fieldName".into(), json!(field_name));
                if !ranges.is_empty() {
                    let ranges = ranges.iter().map(ValueRange::to_json).collect();
                    obj.insert("range".into(), Value::Array(ranges));
                }
            }
            FuzzAction::MutatePacketRule(rule) => {
                obj.insert("ruleID".into(), json!(rule.rule_id));
                obj.insert("includeHeader".into(), json!(rule.include_header));
                obj.insert("enableMutation".into(), json!(rule.enable_mutation));
                if rule.enable_mutation {
                    obj.insert(
                        "mutationRateMultiplier".into(),
                        json!(rule.mutation_rate_multiplier),
                    );
                }
                let clauses = rule
                    .clauses
                    .iter()
                    .map(|clause| match &clause.value {
                        ClauseValue::Literal(v) => {
                            json!({ "field": clause.field, "value": big_to_json(v) })
                        }
                        ClauseValue::Ranges(ranges) => json!({
                            "field": clause.field,
                            "range": ranges.iter().map(ValueRange::to_json).collect::<Vec<_>>(),
                        }),
                    })
                    .collect();
                obj.insert("clauses".into(), Value::Array(clauses));
            }
        }
        Value::Object(obj)
    }
}

/// Renders a big integer as a JSON number, keeping every digit.
pub(crate) fn big_to_json(value: &BigUint) -> Value {
    Number::from_str(&value.to_str_radix(10))
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(value.to_str_radix(10)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_rejects_inverted_bounds() {
        let err = ValueRange::new(BigUint::from(5u8), BigUint::from(4u8)).unwrap_err();
        assert!(matches!(err, RuleError::Validation(_)));
        assert!(ValueRange::new(BigUint::from(4u8), BigUint::from(4u8)).is_ok());
    }

    #[test]
    fn equality_compares_intent_target_and_parameters() {
        let a = FuzzAction::MutateField {
            field_name: "arp_oper".into(),
            ranges: vec![ValueRange::single(BigUint::from(1u8))],
        };
        let b = a.clone();
        let c = FuzzAction::MutateField {
            field_name: "arp_oper".into(),
            ranges: vec![],
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(
            FuzzAction::MutateBytes {
                include_header: false
            },
            FuzzAction::MutatePacket {
                include_header: false
            }
        );
    }

    #[test]
    fn overlapping_clause_ranges_are_rejected() {
        let range =
            |lo: u32, hi: u32| ValueRange::new(BigUint::from(lo), BigUint::from(hi)).unwrap();
        let err = Clause::ranged("reason", vec![range(10, 20), range(0, 10)]).unwrap_err();
        assert!(matches!(err, RuleError::Validation(msg) if msg.contains("overlap")));
        assert!(Clause::ranged("reason", vec![range(11, 20), range(0, 10)]).is_ok());
        assert!(Clause::ranged("reason", vec![range(0, 9), range(3, 3)]).is_err());
        assert!(Clause::ranged("reason", vec![]).is_err());
    }

    #[test]
    fn rule_rejects_negative_multiplier() {
        assert!(PacketRule::new(1, false, true, -0.5, vec![]).is_err());
        assert!(PacketRule::new(1, false, true, f64::NAN, vec![]).is_err());
    }

    #[test]
    fn json_keeps_large_values_as_numbers() {
        let huge = BigUint::from(u64::MAX) * BigUint::from(16u8);
        let rule = PacketRule::new(7, false, false, 1.0, vec![Clause::literal("cookie", huge)])
            .unwrap();
        let text = FuzzAction::MutatePacketRule(rule).to_json().to_string();
        assert!(text.contains("\"value\":295147905179352825840"), "{text}");
        assert!(text.contains("\"intent\":\"mutate_packet_rule\""));
    }
}
