use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lobby::Player;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Active,
    TearingDown,
}

/// A provisioned two-player session and the cluster objects backing it.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub id: u64,
    pub players: [Player; 2],
    pub workload_name: String,
    pub endpoint_name: String,
    pub pod_url: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

impl Match {
    pub fn usernames(&self) -> [&str; 2] {
        [&self.players[0].username, &self.players[1].username]
    }
}

/// Active matches keyed by id. Ids start at 1 and are never handed out twice.
#[derive(Debug)]
pub struct MatchRegistry {
    next_id: u64,
    matches: BTreeMap<u64, Match>,
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            matches: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        players: [Player; 2],
        workload_name: String,
        endpoint_name: String,
        pod_url: String,
    ) -> &Match {
        let id = self.next_id;
        self.next_id += 1;
        self.matches.entry(id).or_insert(Match {
            id,
            players,
            workload_name,
            endpoint_name,
            pod_url,
            status: MatchStatus::Active,
            created_at: Utc::now(),
        })
    }

    pub fn get(&self, id: u64) -> Option<&Match> {
        self.matches.get(&id)
    }

    pub fn remove(&mut self, id: u64) -> Option<Match> {
        self.matches.remove(&id)
    }

    /// Returns false when the match does not exist.
    pub fn set_status(&mut self, id: u64, status: MatchStatus) -> bool {
        match self.matches.get_mut(&id) {
            Some(m) => {
                m.status = status;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.matches.values()
    }
}
