//! State tags and transition contexts.

use isaac_types::{Ballot, Voteproof};
use std::fmt;

/// The consensus states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Stopped,
    Booting,
    Joining,
    Consensus,
    Syncing,
    Broken,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Stopped => "stopped",
            State::Booting => "booting",
            State::Joining => "joining",
            State::Consensus => "consensus",
            State::Syncing => "syncing",
            State::Broken => "broken",
        };
        write!(f, "{s}")
    }
}

/// A requested state transition, with the evidence that triggered it.
#[derive(Debug, Clone)]
pub struct StateChangeContext {
    pub from: State,
    pub to: State,
    pub voteproof: Option<Voteproof>,
    pub ballot: Option<Ballot>,
}

impl StateChangeContext {
    pub fn new(from: State, to: State) -> Self {
        StateChangeContext {
            from,
            to,
            voteproof: None,
            ballot: None,
        }
    }

    pub fn with_voteproof(mut self, voteproof: Voteproof) -> Self {
        self.voteproof = Some(voteproof);
        self
    }

    pub fn with_ballot(mut self, ballot: Ballot) -> Self {
        self.ballot = Some(ballot);
        self
    }
}

impl fmt::Display for StateChangeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
