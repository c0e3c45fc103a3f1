//! Replay session
//!
//! Ties one [`Router`] and one [`Player`] together. Re-initializing a session
//! stops the old player before the router is rebuilt, so no worker ever
//! delivers into a half-built topology.

use crate::config::ReplayConfig;
use crate::error::{ReplayError, Result};
use crate::log::LogLoader;
use crate::player::Player;
use crate::router::{Router, SampleMetadata, TaskCollection};
use crate::transport::Transport;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A loaded set of log files ready for playback
pub struct ReplaySession {
    id: Uuid,
    config: ReplayConfig,
    loader: Arc<dyn LogLoader>,
    router: Arc<Router>,
    player: Option<Player>,
}

impl ReplaySession {
    /// Create an empty session. Nothing is loaded until
    /// [`ReplaySession::initialize`] is called.
    pub fn new(
        loader: Arc<dyn LogLoader>,
        transport: Arc<dyn Transport>,
        config: ReplayConfig,
    ) -> Self {
        let router = Arc::new(Router::new(transport, config.lifecycle.clone()));
        Self {
            id: Uuid::new_v4(),
            config,
            loader,
            router,
            player: None,
        }
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Load `files` and start a paused player over them.
    ///
    /// Any previous player is stopped first and all routing state is reset.
    ///
    /// # Errors
    ///
    /// Fails when the index cannot be built or a whitelist pattern is
    /// invalid. No player is running afterwards in that case.
    pub async fn initialize(
        &mut self,
        files: &[PathBuf],
        prefix: &str,
        whitelist: &[String],
        renamings: &BTreeMap<String, String>,
    ) -> Result<()> {
        if let Some(player) = self.player.take() {
            player.stop().await;
        }

        self.router
            .initialize(self.loader.as_ref(), files, prefix, whitelist, renamings)?;

        let index = self
            .router
            .index()
            .ok_or_else(|| ReplayError::Setup("router has no index after initialize".into()))?;

        let player = Player::spawn(index, self.router.clone(), &self.config.playback)?;

        info!(
            session = %self.id,
            samples = player.sample_count(),
            tasks = self.router.task_snapshot().len(),
            "Replay session initialized"
        );

        self.player = Some(player);
        Ok(())
    }

    /// [`ReplaySession::initialize`] with the files, prefix, whitelist and
    /// renamings from the session configuration
    pub async fn initialize_from_config(&mut self) -> Result<()> {
        let ReplayConfig {
            files,
            prefix,
            whitelist,
            renamings,
            ..
        } = self.config.clone();
        self.initialize(&files, &prefix, &whitelist, &renamings).await
    }

    /// The task/port router
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The playback scheduler
    ///
    /// # Errors
    ///
    /// `InvalidState` before a successful initialize.
    pub fn player(&self) -> Result<&Player> {
        self.player
            .as_ref()
            .ok_or_else(|| ReplayError::invalid_state("session has not been initialized"))
    }

    /// Number of samples in the global sequence
    pub fn sample_count(&self) -> usize {
        self.router.sample_count()
    }

    /// Snapshot of replayed tasks and their ports
    pub fn task_snapshot(&self) -> TaskCollection {
        self.router.task_snapshot()
    }

    /// See [`Router::activate_replay_for_port`]
    pub fn activate_replay_for_port(&self, task_name: &str, port_name: &str, enabled: bool) -> bool {
        self.router
            .activate_replay_for_port(task_name, port_name, enabled)
    }

    /// Stream name and timestamp of the sample the player will deliver next
    pub fn current_sample(&self) -> Option<SampleMetadata> {
        let index = self.player.as_ref()?.current_index();
        self.router.sample_metadata(index)
    }

    /// Stop the player. Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        if let Some(player) = self.player.as_ref() {
            player.stop().await;
            info!(session = %self.id, "Replay session shut down");
        }
    }
}
