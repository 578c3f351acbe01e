use super::action::FuzzAction;
use super::instruction::Instruction;
use crate::openflow::OfMessage;
use log::debug;
use serde_json::{Value, json};

/// Outcome of matching a message against an [`InstructionSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDispatch {
    /// No live instruction matched; the message is forwarded untouched.
    NoMatch,
    /// At least one instruction matched. The actions are de-duplicated and may be empty.
    Matched(Vec<FuzzAction>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstructionSet {
    instructions: Vec<Instruction>,
    auto_filter: bool,
}

impl InstructionSet {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            auto_filter: false,
        }
    }

    /// When enabled, expired instructions are dropped after every lookup.
    pub fn with_auto_filter(mut self, enable: bool) -> Self {
        self.auto_filter = enable;
        self
    }

    pub fn set_auto_filter(&mut self, enable: bool) {
        self.auto_filter = enable;
    }

    pub fn auto_filter(&self) -> bool {
        self.auto_filter
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Collects the actions of every live instruction matching `msg`, counting the match
    /// on each of them.
    pub fn actions_for(&mut self, msg: &OfMessage) -> ActionDispatch {
        let mut matched = false;
        let mut actions: Vec<FuzzAction> = Vec::new();
        for instruction in self.instructions.iter_mut() {
            if instruction.has_expired() || !instruction.is_matching(msg) {
                continue;
            }
            matched = true;
            for action in instruction.actions() {
                if !actions.contains(action) {
                    actions.push(action.clone());
                }
            }
        }

        if self.auto_filter {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("Removed {purged} expired instruction(s)");
            }
        }

        if matched {
            ActionDispatch::Matched(actions)
        } else {
            ActionDispatch::NoMatch
        }
    }

    /// Removes expired instructions and returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.instructions.len();
        self.instructions.retain(|i| !i.has_expired());
        before - self.instructions.len()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "instructions": self.instructions.iter().map(Instruction::to_json).collect::<Vec<_>>(),
        })
    }
}
