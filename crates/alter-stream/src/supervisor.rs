//! Connection supervision
//!
//! At most one stream is live per chat. Connect attempts are serialised
//! behind an async lock; a caller that waited behind a successful connect
//! finds the session live and returns without doing anything.

use std::sync::Arc;
use std::time::Duration;

use alter_core::{StatusField, StatusReporter, StreamingConfig};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ConnectFailure, Result, StreamError};
use crate::negotiator::Negotiator;
use crate::session::ConnectionState;

pub struct ConnectionSupervisor {
    negotiator: Arc<Negotiator>,
    reporter: Arc<StatusReporter>,
    connect_lock: Mutex<()>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ConnectionSupervisor {
    pub fn new(
        negotiator: Arc<Negotiator>,
        reporter: Arc<StatusReporter>,
        config: &StreamingConfig,
    ) -> Self {
        Self {
            negotiator,
            reporter,
            connect_lock: Mutex::new(()),
            max_attempts: config.connect_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    pub fn negotiator(&self) -> &Arc<Negotiator> {
        &self.negotiator
    }

    pub fn is_connected(&self) -> bool {
        self.negotiator.is_live()
    }

    /// Make sure one live stream exists for this avatar image and voice
    pub async fn connect(&self, image_url: &str, voice_id: &str) -> Result<()> {
        if self.negotiator.is_live() {
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        if self.negotiator.is_live() {
            return Ok(());
        }

        self.reporter.set_status(StatusField::Connecting, "true");
        self.reporter.set_status(StatusField::Input, "disabled");

        // Anything left over from a failed or lost stream goes first
        self.negotiator.teardown().await;

        let result = self.attempt_all(image_url, voice_id).await;
        self.reporter.set_status(StatusField::Connecting, "false");
        self.reporter.set_status(StatusField::Input, "enabled");

        match result {
            Ok(()) => {
                self.reporter.success("Connected to the video stream.");
                Ok(())
            }
            Err(e) => {
                let cause = e.connect_failure();
                self.negotiator.teardown().await;
                self.negotiator.set_state(ConnectionState::Failed);
                self.reporter.error(cause.user_message());
                Err(StreamError::connection(cause, e.to_string()))
            }
        }
    }

    async fn attempt_all(&self, image_url: &str, voice_id: &str) -> Result<()> {
        let mut last_error = StreamError::connection(ConnectFailure::Network, "no attempt made");

        for attempt in 1..=self.max_attempts {
            info!("Connect attempt {}/{}", attempt, self.max_attempts);
            match self.attempt(image_url, voice_id).await {
                Ok(()) => {
                    info!("Connected on attempt {}", attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connect attempt {} failed: {}", attempt, e);
                    // Partial ids never survive into the next attempt
                    self.negotiator.teardown().await;
                    last_error = e;
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(&self, image_url: &str, voice_id: &str) -> Result<()> {
        let created = self.negotiator.create_session(image_url, voice_id).await?;
        let answer = self.negotiator.negotiate(&created).await?;
        self.negotiator.submit_answer(&answer).await?;
        self.negotiator.mark_connected();
        Ok(())
    }

    /// Drop the current stream and connect again
    pub async fn reconnect(&self, image_url: &str, voice_id: &str) -> Result<()> {
        {
            let _guard = self.connect_lock.lock().await;
            self.negotiator.teardown().await;
        }
        self.connect(image_url, voice_id).await
    }

    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        self.negotiator.teardown().await;
        info!("Disconnected");
    }
}
