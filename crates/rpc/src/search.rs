// In the future, this may be moved to `ipc` crate
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// How many enumerable results the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requested {
    Limit(u64),
    Unlimited,
}

impl Requested {
    /// Interpret the loosely typed count sent by clients.
    ///
    /// A missing or negative count means "everything".
    pub fn from_raw(raw: Option<i64>) -> Self {
        match raw {
            Some(n) if n >= 0 => Requested::Limit(n as u64),
            _ => Requested::Unlimited,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Requested::Limit(n) => Some(*n),
            Requested::Unlimited => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Requested::Unlimited)
    }
}

impl fmt::Display for Requested {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requested::Limit(n) => write!(f, "{n}"),
            Requested::Unlimited => write!(f, "all"),
        }
    }
}

/// A fresh query run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub user: String,
    pub room: Option<String>,

    /// Query text handed to the translator untouched
    pub query: String,
    pub corpora: Vec<u32>,
    /// Language tags to restrict shards to; empty means all languages
    pub languages: Vec<String>,

    // === Paging ===
    /// `None` or a negative number requests every result
    pub total_requested: Option<i64>,
    pub page_size: u64,
    /// Matches already shown to the user that must not be delivered again
    pub offset: u64,

    /// Dispatch every shard up front with bounded fan-out
    pub simultaneous: bool,
}

impl QueryRequest {
    pub fn requested(&self) -> Requested {
        Requested::from_raw(self.total_requested)
    }
}

/// Continue a previously persisted run, usually to fetch the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Job id of the run being continued
    pub job: Uuid,
    pub user: String,
    pub room: Option<String>,
    pub query: String,
    pub total_requested: Option<i64>,
    pub page_size: u64,
    pub offset: u64,
}

impl ResumeRequest {
    pub fn requested(&self) -> Requested {
        Requested::from_raw(self.total_requested)
    }
}

/// Who may stop a run.
///
/// Sequential runs are scoped to the user's room; a simultaneous fan-out
/// shares one base id across all of its shards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunScope {
    Room { user: String, room: String },
    Group { base: Uuid },
}

impl RunScope {
    pub fn room(user: impl Into<String>, room: Option<&str>) -> Self {
        RunScope::Room {
            user: user.into(),
            room: room.unwrap_or_default().to_string(),
        }
    }

    /// Pubsub channel progress for this scope is published on.
    pub fn channel(&self) -> String {
        match self {
            RunScope::Room { user, room } => format!("{user}:{room}"),
            RunScope::Group { base } => format!("group:{base}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, Requested::Unlimited)]
    #[case(Some(-1), Requested::Unlimited)]
    #[case(Some(0), Requested::Limit(0))]
    #[case(Some(50), Requested::Limit(50))]
    fn test_requested_from_raw(#[case] raw: Option<i64>, #[case] expected: Requested) {
        assert_eq!(Requested::from_raw(raw), expected);
    }

    #[test]
    fn test_scope_channel() {
        let scope = RunScope::room("alice", Some("r1"));
        assert_eq!(scope.channel(), "alice:r1");
        let scope = RunScope::room("bob", None);
        assert_eq!(scope.channel(), "bob:");
    }
}
