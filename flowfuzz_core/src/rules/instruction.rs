use super::RuleError;
use super::action::FuzzAction;
use super::criteria::CriteriaSet;
use crate::openflow::OfMessage;
use serde_json::{Value, json};

/// Binds alternative criteria sets to a list of actions, optionally for a limited number
/// of matches. Once the limit is reached the instruction stays expired.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    criteria: Vec<CriteriaSet>,
    actions: Vec<FuzzAction>,
    match_limit: Option<u64>,
    match_count: u64,
}

impl Instruction {
    /// `match_limit` of `Some(0)` is rejected; `None` means unlimited.
    pub fn new(
        criteria: Vec<CriteriaSet>,
        actions: Vec<FuzzAction>,
        match_limit: Option<u64>,
    ) -> Result<Self, RuleError> {
        if match_limit == Some(0) {
            return Err(RuleError::Validation(
                "matchLimit must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            criteria,
            actions,
            match_limit,
            match_count: 0,
        })
    }

    /// Checks `msg` against the criteria sets and counts the match. Instructions without
    /// criteria match everything.
    pub fn is_matching(&mut self, msg: &OfMessage) -> bool {
        let matching =
            self.criteria.is_empty() || self.criteria.iter().any(|set| set.is_satisfied(msg));
        if matching {
            self.match_count = self.match_count.saturating_add(1);
        }
        matching
    }

    pub fn has_expired(&self) -> bool {
        self.match_limit
            .is_some_and(|limit| self.match_count >= limit)
    }

    pub fn actions(&self) -> &[FuzzAction] {
        &self.actions
    }

    pub fn criteria(&self) -> &[CriteriaSet] {
        &self.criteria
    }

    pub fn match_limit(&self) -> Option<u64> {
        self.match_limit
    }

    pub fn match_count(&self) -> u64 {
        self.match_count
    }

    pub fn to_json(&self) -> Value {
        let mut value = json!({
            "criteria": self.criteria.iter().map(CriteriaSet::to_json).collect::<Vec<_>>(),
            "actions": self.actions.iter().map(FuzzAction::to_json).collect::<Vec<_>>(),
            "matchCount": self.match_count,
        });
        if let Some(limit) = self.match_limit {
            value["matchLimit"] = json!(limit);
        }
        value
    }
}
