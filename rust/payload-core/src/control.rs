//! Control directive resolution.
//!
//! A Start directive tells the payload who takes part in the computation,
//! whether iterations are barrier-synchronized and which user options apply.
//! [`Control`] is the decoded, immutable form of that directive.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PayloadError, Result};
use crate::proto;
use crate::proto::user_option_value::Kind;
use crate::protocol::NodeId;

/// A named user option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOption {
    Bool(bool),
    Int64(i64),
    Str(String),
}

impl fmt::Display for UserOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Str(v) => write!(f, "{}", v),
        }
    }
}

impl UserOption {
    fn decode(name: &str, value: proto::UserOptionValue) -> Result<Self> {
        match value.kind {
            Some(Kind::BoolValue(v)) => Ok(Self::Bool(v)),
            Some(Kind::Int64Value(v)) => Ok(Self::Int64(v)),
            Some(Kind::StrValue(v)) => Ok(Self::Str(v)),
            None => Err(PayloadError::invalid_option(name, "option has no value set")),
        }
    }
}

impl From<UserOption> for proto::UserOptionValue {
    fn from(option: UserOption) -> Self {
        let kind = match option {
            UserOption::Bool(v) => Kind::BoolValue(v),
            UserOption::Int64(v) => Kind::Int64Value(v),
            UserOption::Str(v) => Kind::StrValue(v),
        };
        Self { kind: Some(kind) }
    }
}

pub type UserOptions = BTreeMap<String, UserOption>;

/// Decoded control directive for one Start→Terminate cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    local_id: NodeId,
    participants: Vec<NodeId>,
    others: Vec<NodeId>,
    synchronized: bool,
    options: UserOptions,
}

impl Control {
    /// Build the control state from a Start directive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if any option carries no value.
    pub fn apply(local_id: NodeId, directive: &proto::PolluxControl) -> Result<Self> {
        let participants: Vec<NodeId> = directive.part_ids.iter().copied().map(NodeId).collect();
        let others = participants
            .iter()
            .copied()
            .filter(|id| *id != local_id)
            .collect();

        let mut options = UserOptions::new();
        for (name, value) in &directive.user_options {
            options.insert(name.clone(), UserOption::decode(name, value.clone())?);
        }

        Ok(Self {
            local_id,
            participants,
            others,
            synchronized: directive.synchronized,
            options,
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Every participant, including this node.
    pub fn participants(&self) -> &[NodeId] {
        &self.participants
    }

    /// Participants other than this node, in directive order.
    pub fn others(&self) -> &[NodeId] {
        &self.others
    }

    pub fn is_participant(&self, id: NodeId) -> bool {
        self.participants.contains(&id)
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    pub fn options(&self) -> &UserOptions {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&UserOption> {
        self.options.get(name)
    }

    pub fn option_or(&self, name: &str, default: UserOption) -> UserOption {
        self.options.get(name).cloned().unwrap_or(default)
    }

    /// Integer option, or `default` if absent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if the option is present with another type.
    pub fn int64_or(&self, name: &str, default: i64) -> Result<i64> {
        match self.options.get(name) {
            None => Ok(default),
            Some(UserOption::Int64(v)) => Ok(*v),
            Some(_) => Err(PayloadError::invalid_option(name, "expected an integer")),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.options.get(name) {
            None => Ok(default),
            Some(UserOption::Bool(v)) => Ok(*v),
            Some(_) => Err(PayloadError::invalid_option(name, "expected a boolean")),
        }
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> Result<&'a str> {
        match self.options.get(name) {
            None => Ok(default),
            Some(UserOption::Str(v)) => Ok(v.as_str()),
            Some(_) => Err(PayloadError::invalid_option(name, "expected a string")),
        }
    }

    /// Non-negative integer option, or `default` if absent.
    pub fn count_or(&self, name: &str, default: u64) -> Result<u64> {
        match self.options.get(name) {
            None => Ok(default),
            Some(UserOption::Int64(v)) => u64::try_from(*v)
                .map_err(|_| PayloadError::invalid_option(name, "must not be negative")),
            Some(_) => Err(PayloadError::invalid_option(name, "expected an integer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn directive(
        part_ids: Vec<i32>,
        synchronized: bool,
        options: Vec<(&str, UserOption)>,
    ) -> proto::PolluxControl {
        proto::PolluxControl {
            part_ids,
            synchronized,
            user_options: options
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.into()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_others_exclude_local_id() {
        let control = Control::apply(NodeId(2), &directive(vec![1, 2, 3], true, vec![])).unwrap();
        assert_eq!(control.participants(), &[NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(control.others(), &[NodeId(1), NodeId(3)]);
        assert!(control.is_synchronized());
        assert!(control.options().is_empty());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let d = directive(
            vec![0, 1, 2],
            false,
            vec![("nb_iterations", UserOption::Int64(3)), ("code", UserOption::Str("x".into()))],
        );
        let first = Control::apply(NodeId(0), &d).unwrap();
        let second = Control::apply(NodeId(0), &d).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.others(), &[NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_unset_option_is_invalid() {
        let mut d = directive(vec![1, 2], true, vec![]);
        d.user_options
            .insert("broken".to_string(), proto::UserOptionValue { kind: None });

        let err = Control::apply(NodeId(1), &d).unwrap_err();
        match err {
            PayloadError::InvalidOption { name, .. } => assert_eq!(name, "broken"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_option_lookup_and_defaults() {
        let d = directive(
            vec![1],
            false,
            vec![
                ("nb_iterations", UserOption::Int64(7)),
                ("verbose", UserOption::Bool(true)),
                ("label", UserOption::Str("pso".into())),
            ],
        );
        let control = Control::apply(NodeId(1), &d).unwrap();

        assert_eq!(control.option("nb_iterations"), Some(&UserOption::Int64(7)));
        assert_eq!(control.option("missing"), None);
        assert_eq!(
            control.option_or("missing", UserOption::Int64(1)),
            UserOption::Int64(1)
        );
        assert_eq!(control.int64_or("nb_iterations", 5).unwrap(), 7);
        assert_eq!(control.int64_or("missing", 5).unwrap(), 5);
        assert!(control.bool_or("verbose", false).unwrap());
        assert_eq!(control.str_or("label", "none").unwrap(), "pso");
        assert!(control.int64_or("label", 0).is_err());
        assert!(control.others().is_empty());
    }

    #[test]
    fn test_count_rejects_negative() {
        let d = directive(vec![1], true, vec![("nb_iterations", UserOption::Int64(-1))]);
        let control = Control::apply(NodeId(1), &d).unwrap();
        assert!(matches!(
            control.count_or("nb_iterations", 5),
            Err(PayloadError::InvalidOption { .. })
        ));
    }
}
