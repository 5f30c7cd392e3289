//! Row state machines of the grouped parse modes.
//!
//! Each machine is a small value advanced by `step`, which takes the current
//! state and a classified row and returns the next state plus the action the
//! scanning loop should take. No I/O and no cell access happen here.

/// AGENT_GROUPED phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPhase {
    #[default]
    AwaitingHeader,
    InGroup,
}

/// An AGENT_GROUPED row after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupedRow {
    Noise,
    Stop,
    Subtotal,
    /// Opens a group. `has_detail` when the same row also carries branch data.
    AgentHeader { token: String, has_detail: bool },
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupState {
    pub phase: GroupPhase,
    pub pending_agent_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAction {
    Ignore,
    Stop,
    /// Emit a record for this row under the given agent token.
    Emit { agent_token: String },
    /// Detail row with no open group.
    Orphan,
}

impl GroupState {
    pub fn step(self, row: GroupedRow) -> (GroupState, GroupAction) {
        match row {
            GroupedRow::Noise => (self, GroupAction::Ignore),
            GroupedRow::Stop => (self, GroupAction::Stop),
            GroupedRow::Subtotal => (GroupState::default(), GroupAction::Ignore),
            GroupedRow::AgentHeader { token, has_detail } => {
                let action = if has_detail {
                    GroupAction::Emit {
                        agent_token: token.clone(),
                    }
                } else {
                    GroupAction::Ignore
                };
                let next = GroupState {
                    phase: GroupPhase::InGroup,
                    pending_agent_token: Some(token),
                };
                (next, action)
            }
            GroupedRow::Detail => match (&self.phase, &self.pending_agent_token) {
                (GroupPhase::InGroup, Some(token)) => {
                    let action = GroupAction::Emit {
                        agent_token: token.clone(),
                    };
                    (self, action)
                }
                _ => (self, GroupAction::Orphan),
            },
        }
    }
}

/// A THREE_ROW_GROUP row after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreeRowKind {
    Noise,
    /// Row 1: agent token with last year's figure.
    AgentRow { token: String, previous: Option<f64> },
    /// Row 2: this year's figure, no agent token.
    CurrentRow,
    /// Row 3: change label, discarded.
    ChangeRow,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreeRowState {
    pub pending_agent_token: Option<String>,
    pub pending_previous_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThreeRowAction {
    Ignore,
    Emit {
        agent_token: String,
        previous: Option<f64>,
    },
    /// Current-year row with no agent row before it.
    Orphan,
}

impl ThreeRowState {
    pub fn step(self, row: ThreeRowKind) -> (ThreeRowState, ThreeRowAction) {
        match row {
            ThreeRowKind::Noise | ThreeRowKind::ChangeRow => (self, ThreeRowAction::Ignore),
            ThreeRowKind::AgentRow { token, previous } => (
                ThreeRowState {
                    pending_agent_token: Some(token),
                    pending_previous_amount: previous,
                },
                ThreeRowAction::Ignore,
            ),
            ThreeRowKind::CurrentRow => match self.pending_agent_token {
                Some(agent_token) => (
                    ThreeRowState::default(),
                    ThreeRowAction::Emit {
                        agent_token,
                        previous: self.pending_previous_amount,
                    },
                ),
                None => (self, ThreeRowAction::Orphan),
            },
        }
    }
}
