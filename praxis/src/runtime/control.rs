//! The runtime control plane.
//!
//! Every verb checks an [`AuthorizationContext`]; shutdown-class verbs
//! require `system:control`, read paths require `read:any`, and the
//! emergency stop verifies a signed command against an active root or
//! authority key before acting. Every invocation is audited.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{Notify, RwLock, watch};
use tracing::instrument;

use crate::adaptation::AdaptationController;
use crate::audit::{AuditEventType, AuditService};
use crate::auth::{
    AuthService, AuthorizationContext, SCOPE_READ_ANY, SCOPE_SYSTEM_CONTROL, SignedCommand,
};
use crate::store::ThoughtStore;
use crate::store::model::QueueStatus;

use super::{EngineError, RuntimeState};

/// Control handles shared between the scheduler and the control surface.
pub struct RuntimeControl {
    state_tx: watch::Sender<RuntimeState>,
    cancel_tx: watch::Sender<bool>,
    step_notify: Notify,
    pause_reason: RwLock<Option<String>>,
    auth: Arc<AuthService>,
    audit: Arc<AuditService>,
    store: Arc<ThoughtStore>,
    adaptation: Arc<AdaptationController>,
}

impl std::fmt::Debug for RuntimeControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeControl")
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl RuntimeControl {
    /// Build the control plane in the Running state.
    #[must_use]
    pub fn new(
        auth: Arc<AuthService>,
        audit: Arc<AuditService>,
        store: Arc<ThoughtStore>,
        adaptation: Arc<AdaptationController>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(RuntimeState::Running);
        let (cancel_tx, _) = watch::channel(false);
        Arc::new(Self {
            state_tx,
            cancel_tx,
            step_notify: Notify::new(),
            pause_reason: RwLock::new(None),
            auth,
            audit,
            store,
            adaptation,
        })
    }

    /// Current runtime state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        *self.state_tx.borrow()
    }

    /// Watch handle the scheduler drives its loop from.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<RuntimeState> {
        self.state_tx.subscribe()
    }

    /// The reason given for the current pause, if paused.
    pub async fn pause_reason(&self) -> Option<String> {
        self.pause_reason.read().await.clone()
    }

    /// Cancellation watch handed to in-flight pipeline work.
    #[must_use]
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_tx.subscribe()
    }

    /// Await a single-step request (scheduler-side).
    pub async fn step_requested(&self) {
        self.step_notify.notified().await;
    }

    /// Suspend processing rounds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] ("forbidden") without `system:control`.
    #[instrument(skip(self, authorization))]
    pub async fn pause(
        &self,
        authorization: &AuthorizationContext,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.auth
            .require_scope(authorization, SCOPE_SYSTEM_CONTROL)?;
        *self.pause_reason.write().await = Some(reason.to_string());
        let _ = self.state_tx.send(RuntimeState::Paused);
        self.audit_control(&authorization.wa_id, "pause", json!({"reason": reason}))
            .await?;
        Ok(())
    }

    /// Resume processing rounds.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] without `system:control`.
    #[instrument(skip(self, authorization))]
    pub async fn resume(&self, authorization: &AuthorizationContext) -> Result<(), EngineError> {
        self.auth
            .require_scope(authorization, SCOPE_SYSTEM_CONTROL)?;
        *self.pause_reason.write().await = None;
        let _ = self.state_tx.send(RuntimeState::Running);
        self.audit_control(&authorization.wa_id, "resume", json!({}))
            .await?;
        Ok(())
    }

    /// Process exactly one thought while paused.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] without `system:control`.
    #[instrument(skip(self, authorization))]
    pub async fn single_step(
        &self,
        authorization: &AuthorizationContext,
    ) -> Result<(), EngineError> {
        self.auth
            .require_scope(authorization, SCOPE_SYSTEM_CONTROL)?;
        self.step_notify.notify_one();
        self.audit_control(&authorization.wa_id, "single_step", json!({}))
            .await?;
        Ok(())
    }

    /// Queue counts for the control surface.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] without `read:any`.
    pub async fn queue_status(
        &self,
        authorization: &AuthorizationContext,
    ) -> Result<QueueStatus, EngineError> {
        self.auth.require_scope(authorization, SCOPE_READ_ANY)?;
        Ok(self.store.queue_status().await?)
    }

    /// Request a transition to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] for missing scopes; `Halted` is only
    /// reachable through the signed emergency command.
    pub async fn request_state_transition(
        &self,
        authorization: &AuthorizationContext,
        target: RuntimeState,
        reason: &str,
    ) -> Result<(), EngineError> {
        match target {
            RuntimeState::Running => self.resume(authorization).await,
            RuntimeState::Paused => self.pause(authorization, reason).await,
            RuntimeState::ShuttingDown => self.shutdown(authorization, reason).await,
            RuntimeState::Halted => Err(crate::auth::AuthError::Forbidden.into()),
        }
    }

    /// Graceful shutdown: stop new rounds, cancel in-flight work.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] without `system:control`.
    #[instrument(skip(self, authorization))]
    pub async fn shutdown(
        &self,
        authorization: &AuthorizationContext,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.auth
            .require_scope(authorization, SCOPE_SYSTEM_CONTROL)?;
        self.audit_control(&authorization.wa_id, "shutdown", json!({"reason": reason}))
            .await?;
        let _ = self.state_tx.send(RuntimeState::ShuttingDown);
        let _ = self.cancel_tx.send(true);
        Ok(())
    }

    /// Emergency shutdown: verify the command's signature against an
    /// active root/authority key, then force Halted and stop adaptation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Auth`] ("forbidden") when the signature does
    /// not verify.
    #[instrument(skip(self, command), fields(wa_id = %command.wa_id))]
    pub async fn emergency_shutdown(&self, command: &SignedCommand) -> Result<(), EngineError> {
        self.auth.verify_emergency_command(command).await?;

        self.audit_control(
            &command.wa_id,
            "emergency_shutdown",
            json!({"verb": command.verb, "issued_at": command.issued_at}),
        )
        .await?;
        self.adaptation.emergency_stop("emergency shutdown").await;
        let _ = self.state_tx.send(RuntimeState::Halted);
        let _ = self.cancel_tx.send(true);
        Ok(())
    }

    /// Force Halted from inside the engine (integrity failures). Not a
    /// control-plane verb; requires no credentials.
    pub async fn halt_for_integrity(&self, reason: &str) {
        tracing::error!(%reason, "integrity failure; halting");
        let _ = self
            .audit_control("engine", "integrity_halt", json!({"reason": reason}))
            .await;
        self.adaptation.emergency_stop(reason).await;
        let _ = self.state_tx.send(RuntimeState::Halted);
        let _ = self.cancel_tx.send(true);
    }

    async fn audit_control(
        &self,
        originator: &str,
        verb: &str,
        detail: serde_json::Value,
    ) -> Result<(), EngineError> {
        self.audit
            .record(
                AuditEventType::RuntimeControl,
                originator,
                json!({"verb": verb, "detail": detail}),
            )
            .await?;
        Ok(())
    }
}
