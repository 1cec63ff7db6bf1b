//! Match orchestration: login and queueing, pairing, per-match provisioning and
//! teardown.
//!
//! The lobby and the match registry each sit behind their own mutex and no lock
//! is ever held across a control plane round-trip, so independent provisioning
//! pipelines run concurrently while every registry mutation stays atomic.

pub mod lobby;
pub mod matches;
pub mod provisioner;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::events::{ClientMessage, ServerMessage};
use lobby::{Lobby, Player};
use matches::{Match, MatchRegistry, MatchStatus};
use provisioner::{Provisioner, TeardownError};

pub const END_GAME_SUCCESS_MESSAGE: &str = "Match ended successfully.";
pub const END_GAME_ERROR_MESSAGE: &str = "Failed to end match.";
pub const PROVISION_FAILED_MESSAGE: &str = "Could not start the match server.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub sessions: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    dispatcher: Dispatcher,
    lobby: Arc<Mutex<Lobby>>,
    matches: Arc<Mutex<MatchRegistry>>,
    provisioner: Arc<Provisioner>,
}

impl Orchestrator {
    pub fn new(provisioner: Provisioner) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            lobby: Arc::new(Mutex::new(Lobby::new())),
            matches: Arc::new(Mutex::new(MatchRegistry::new())),
            provisioner: Arc::new(provisioner),
        }
    }

    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<String>) {
        self.dispatcher.connect()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Single entry point for client messages. Cluster work is spawned so the
    /// caller's socket loop keeps forwarding notifications; the handle is returned
    /// for callers that want to wait on it.
    pub async fn handle_message(
        &self,
        connection_id: &str,
        msg: ClientMessage,
    ) -> Option<JoinHandle<()>> {
        match msg {
            ClientMessage::Login { username } => {
                self.login(connection_id, &username).await;
                None
            }
            ClientMessage::JoinQueue => {
                let players = self.join_queue(connection_id).await?;
                let this = self.clone();
                Some(tokio::spawn(async move {
                    this.start_match(players).await;
                }))
            }
            ClientMessage::CancelQueue => {
                self.cancel_queue(connection_id).await;
                None
            }
            ClientMessage::EndGame { pod_url, match_id } => {
                let this = self.clone();
                let requester = connection_id.to_string();
                Some(tokio::spawn(async move {
                    let _ = this.end_game(&requester, &pod_url, match_id).await;
                }))
            }
        }
    }

    pub async fn login(&self, connection_id: &str, username: &str) {
        self.lobby.lock().await.login(connection_id, username);
        tracing::info!(%connection_id, %username, "login");
        self.dispatcher.send(
            connection_id,
            &ServerMessage::LoginSuccess {
                username: username.to_string(),
            },
        );
    }

    /// Enqueues the connection and returns a pair when one was formed.
    pub async fn join_queue(&self, connection_id: &str) -> Option<[Player; 2]> {
        let mut lobby = self.lobby.lock().await;
        if lobby.session(connection_id).is_none() {
            tracing::debug!(%connection_id, "join_queue without a session, ignoring");
            return None;
        }
        let pair = lobby.join(connection_id);
        tracing::info!(%connection_id, waiting = lobby.waiting(), "joined queue");
        pair
    }

    pub async fn cancel_queue(&self, connection_id: &str) {
        self.lobby.lock().await.cancel(connection_id);
        tracing::info!(%connection_id, "left queue");
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.lobby.lock().await.disconnect(connection_id);
        self.dispatcher.remove(connection_id);
        tracing::info!(%connection_id, "disconnected");
    }

    fn notify_players(&self, players: &[Player; 2], msg: &ServerMessage) {
        for player in players {
            self.dispatcher.send(&player.connection_id, msg);
        }
    }

    /// Provisions a workload for a freshly formed pair. Returns the match id on
    /// success; on failure no match is registered and both players are told.
    pub async fn start_match(&self, players: [Player; 2]) -> Option<u64> {
        tracing::info!(
            players = ?[&players[0].username, &players[1].username],
            "pair formed, provisioning match"
        );
        self.notify_players(&players, &ServerMessage::MatchCreating);

        let provisioned = match self.provisioner.provision().await {
            Ok(provisioned) => provisioned,
            Err(e) => {
                tracing::error!("failed to create match: {e}");
                self.notify_players(
                    &players,
                    &ServerMessage::MatchProvisionFailed {
                        message: PROVISION_FAILED_MESSAGE.to_string(),
                    },
                );
                return None;
            }
        };

        let match_id = {
            let mut matches = self.matches.lock().await;
            matches
                .register(
                    players.clone(),
                    provisioned.workload_name,
                    provisioned.endpoint_name,
                    provisioned.external_address.clone(),
                )
                .id
        };
        tracing::info!(match_id, pod_url = %provisioned.external_address, "match ready");

        self.notify_players(
            &players,
            &ServerMessage::MatchFound {
                pod_url: provisioned.external_address,
                match_id,
            },
        );
        Some(match_id)
    }

    /// Tears down the workload behind `pod_url` and retires `match_id`.
    ///
    /// The cluster side is resolved from the address alone; the registry is only
    /// consulted afterwards, to know whom to notify.
    pub async fn end_game(
        &self,
        requester: &str,
        pod_url: &str,
        match_id: u64,
    ) -> Result<(), TeardownError> {
        self.matches
            .lock()
            .await
            .set_status(match_id, MatchStatus::TearingDown);

        let released = match self.provisioner.release(pod_url).await {
            Ok(released) => released,
            Err(e) => {
                tracing::error!(match_id, %pod_url, "failed to end match: {e}");
                self.matches
                    .lock()
                    .await
                    .set_status(match_id, MatchStatus::Active);
                self.dispatcher.send(
                    requester,
                    &ServerMessage::EndGameError {
                        message: END_GAME_ERROR_MESSAGE.to_string(),
                    },
                );
                return Err(e);
            }
        };

        let Some(ended) = self.matches.lock().await.remove(match_id) else {
            tracing::warn!(match_id, "resources released but match id is unknown");
            return Ok(());
        };
        if ended.endpoint_name != released.endpoint_name {
            tracing::warn!(
                match_id,
                registered = %ended.endpoint_name,
                released = %released.endpoint_name,
                "released endpoint does not belong to this match"
            );
        }

        self.notify_players(
            &ended.players,
            &ServerMessage::EndGameSuccess {
                message: END_GAME_SUCCESS_MESSAGE.to_string(),
            },
        );
        tracing::info!(match_id, "match ended");
        Ok(())
    }

    pub async fn list_matches(&self) -> Vec<Match> {
        self.matches.lock().await.iter().cloned().collect()
    }

    pub async fn get_match(&self, match_id: u64) -> Option<Match> {
        self.matches.lock().await.get(match_id).cloned()
    }

    pub async fn queue_stats(&self) -> QueueStats {
        let lobby = self.lobby.lock().await;
        QueueStats {
            waiting: lobby.waiting(),
            sessions: lobby.session_count(),
        }
    }
}
