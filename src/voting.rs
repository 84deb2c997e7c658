//! Vote toggle state machine and score tally.
//!
//! Per (user, content) pair the ledger holds no row, an up row or a down row.
//! Stores call [`toggle`] with the current row and the requested value, apply
//! the returned [`VoteChange`], then recompute the score with [`tally`] from
//! the whole ledger of that content item inside the same transaction.

use chrono::{DateTime, Utc};

use crate::models::{Score, VoteValue};

/// Ledger mutation for one (user, content) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Insert(VoteValue),
    Update(VoteValue),
    Delete,
}

impl VoteChange {
    /// The user's vote after the change is applied.
    pub fn resulting(self) -> Option<VoteValue> {
        match self {
            VoteChange::Insert(v) | VoteChange::Update(v) => Some(v),
            VoteChange::Delete => None,
        }
    }
}

pub fn toggle(current: Option<VoteValue>, requested: VoteValue) -> VoteChange {
    match current {
        None => VoteChange::Insert(requested),
        Some(v) if v == requested => VoteChange::Delete,
        Some(_) => VoteChange::Update(requested),
    }
}

/// Recompute score fields from every vote on one item.
/// `timepoints` is the creation unix timestamp plus points.
pub fn tally<I>(votes: I, created: DateTime<Utc>) -> Score
where
    I: IntoIterator<Item = VoteValue>,
{
    let (mut up, mut down) = (0i64, 0i64);
    for v in votes {
        match v {
            VoteValue::Up => up += 1,
            VoteValue::Down => down += 1,
        }
    }
    from_counts(up, down, created)
}

pub fn from_counts(up: i64, down: i64, created: DateTime<Utc>) -> Score {
    let points = up - down;
    Score { up, down, points, timepoints: created.timestamp() + points }
}
