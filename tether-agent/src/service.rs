//! Agent service core logic.
//!
//! Wires the controller channel to the command dispatcher and keeps the
//! audit trail: one audit session per controller connection.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tether_core::clock::now_ms;
use tether_core::{
    AuditLevel, AuditLog, CaptureBackend, CapturePipeline, Channel, ChannelEvent, ChannelEvents,
    DeviceServices, Dispatcher, InjectionCapability, InputBridge, MemoryAuditLog, SessionId,
    SessionStatus, TaskPool, TetherError, install_defaults,
};

use crate::config::AgentConfig;
use crate::platform::{HeadlessCapture, HostDevice, NoTouchScreen};

/// The platform seams the agent drives.
#[derive(Clone)]
pub struct Platform {
    pub device: Arc<dyn DeviceServices>,
    pub capture: Arc<dyn CaptureBackend>,
    pub injection: Arc<dyn InjectionCapability>,
}

impl Platform {
    /// Filesystem-backed device services, no capture, no touch.
    pub fn host() -> Self {
        Self {
            device: Arc::new(HostDevice),
            capture: Arc::new(HeadlessCapture),
            injection: Arc::new(NoTouchScreen),
        }
    }
}

// ── AgentService ─────────────────────────────────────────────────

pub struct AgentService {
    config: AgentConfig,
    audit: Arc<MemoryAuditLog>,
    cancel: CancellationToken,
}

impl AgentService {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            audit: Arc::new(MemoryAuditLog::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn audit(&self) -> &Arc<MemoryAuditLog> {
        &self.audit
    }

    /// Run with the host platform until stopped.
    pub async fn run(&self) -> Result<(), TetherError> {
        self.run_with(Platform::host()).await
    }

    /// Run against `platform` until stopped.
    ///
    /// Fails only on startup problems (an invalid key); connection loss is
    /// retried forever.
    pub async fn run_with(&self, platform: Platform) -> Result<(), TetherError> {
        let (channel, events) =
            Channel::new(self.config.connection_info(), self.config.reconnect_policy());
        if let Some(key) = self.config.encryption_key()? {
            channel.set_key(&key)?;
        }

        let sink = Arc::new(channel.sender());
        let tasks = Arc::new(TaskPool::new());
        let pipeline = CapturePipeline::new(platform.capture, sink.clone(), Arc::clone(&tasks));
        let input = Arc::new(InputBridge::new(platform.injection));

        let audit: Arc<dyn AuditLog> = self.audit.clone();
        let mut dispatcher = Dispatcher::new(sink, Arc::clone(&tasks)).with_audit(audit);
        install_defaults(&mut dispatcher, platform.device, pipeline, input);

        info!(
            endpoint = %channel.info(),
            encrypted = channel.is_encrypted(),
            "agent starting"
        );

        tokio::join!(
            channel.run(self.cancel.clone()),
            self.serve(events, &dispatcher, channel.info().to_string()),
        );

        tasks.shutdown().await;
        info!("agent stopped");
        Ok(())
    }

    async fn serve(&self, mut events: ChannelEvents, dispatcher: &Dispatcher, endpoint: String) {
        let mut session: Option<SessionId> = None;
        let mut prune = tokio::time::interval(self.config.audit_prune_interval());
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = prune.tick() => {
                    self.prune_audit();
                    continue;
                }
                e = events.recv() => e,
            };
            let Some(event) = event else { break };

            match event {
                ChannelEvent::Connected => {
                    self.close_session(&mut session, SessionStatus::Closed);
                    session = self.open_session(&endpoint);
                }
                ChannelEvent::Disconnected => {
                    self.close_session(&mut session, SessionStatus::Closed);
                }
                ChannelEvent::Envelope(envelope) => {
                    dispatcher.on_envelope(envelope).await;
                }
            }
        }

        self.close_session(&mut session, SessionStatus::Closed);
    }

    /// Drop audit lines and finished sessions past the retention window.
    fn prune_audit(&self) {
        let retention =
            u64::try_from(self.config.audit_retention().as_millis()).unwrap_or(u64::MAX);
        let pruned = self.audit.prune_before(now_ms().saturating_sub(retention));
        if !pruned.is_empty() {
            info!(
                sessions = pruned.sessions,
                records = pruned.records,
                "pruned old audit entries"
            );
        }
    }

    fn open_session(&self, endpoint: &str) -> Option<SessionId> {
        self.prune_audit();

        let token = format!("{endpoint}@{}", now_ms());
        match self.audit.open_session(&token) {
            Ok(id) => {
                let _ = self
                    .audit
                    .append(id, AuditLevel::Info, &format!("connected to {endpoint}"));
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "could not open audit session");
                None
            }
        }
    }

    fn close_session(&self, session: &mut Option<SessionId>, status: SessionStatus) {
        let Some(id) = session.take() else { return };
        let _ = self.audit.append(id, AuditLevel::Info, "disconnected");
        if let Err(e) = self.audit.close_session(id, status) {
            warn!(error = %e, "could not close audit session");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use serde_json::{Value, json};
    use tether_core::Envelope;
    use tether_core::network::Connection;
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    const WAIT: Duration = Duration::from_secs(5);

    async fn config_for(listener: &TcpListener) -> AgentConfig {
        let addr = listener.local_addr().unwrap();
        let mut config = AgentConfig::default();
        config.controller.host = addr.ip().to_string();
        config.controller.port = addr.port();
        config.reconnect.initial_ms = 20;
        config.reconnect.max_ms = 20;
        config
    }

    async fn accept(listener: &TcpListener) -> Connection {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("agent never connected")
            .unwrap();
        Connection::new(stream)
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = AgentService::new(AgentConfig::default());
        assert!(!svc.stop_handle().is_cancelled());
        assert!(svc.audit().sessions().is_empty());
    }

    #[tokio::test]
    async fn invalid_key_fails_startup() {
        let mut config = AgentConfig::default();
        config.security.key = "not-a-key".into();
        let svc = AgentService::new(config);
        assert_err!(svc.run().await);
    }

    #[tokio::test]
    async fn serves_commands_and_audits_each_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let svc = Arc::new(AgentService::new(config_for(&listener).await));
        let runner = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.run().await }
        });

        let mut controller = accept(&listener).await;
        controller
            .send(Envelope::new("order", json!({ "order": "x0000lm" }).to_string()))
            .await
            .unwrap();
        let reply = tokio::time::timeout(WAIT, controller.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.tag, "x0000lm");
        let body: Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(body, json!({ "success": true, "data": { "enable": false } }));

        let first = svc.audit().active_session().expect("session open");
        assert!(svc
            .audit()
            .logs_for(first)
            .iter()
            .any(|r| r.message.contains("x0000lm/get_location")));

        // Dropping the controller closes the session; the agent reconnects.
        drop(controller);
        let _second = accept(&listener).await;
        wait_until(|| svc.audit().session(first).is_some_and(|s| s.ended_ms.is_some())).await;
        wait_until(|| svc.audit().active_session().is_some_and(|id| id != first)).await;

        svc.stop();
        assert_ok!(runner.await.unwrap());
        assert!(svc.audit().active_session().is_none());
        assert_eq!(
            svc.audit().session(first).unwrap().status,
            SessionStatus::Closed
        );
    }

    #[tokio::test]
    async fn finished_sessions_age_out_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config_for(&listener).await;
        config.audit.retention_secs = 0;
        config.audit.prune_interval_secs = 1;
        let svc = Arc::new(AgentService::new(config));
        let runner = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move { svc.run().await }
        });

        let first_conn = accept(&listener).await;
        wait_until(|| svc.audit().active_session().is_some()).await;
        let first = svc.audit().active_session().unwrap();
        drop(first_conn);

        let _second_conn = accept(&listener).await;
        wait_until(|| svc.audit().active_session().is_some_and(|id| id != first)).await;
        let second = svc.audit().active_session().unwrap();

        wait_until(|| svc.audit().session(first).is_none()).await;

        // The live session keeps its record, but its lines still age out.
        wait_until(|| svc.audit().logs_for(second).is_empty()).await;
        assert_eq!(svc.audit().active_session(), Some(second));
        let token = svc.audit().session(second).unwrap().token;
        assert_eq!(svc.audit().session_by_token(&token).unwrap().id, second);

        svc.stop();
        assert_ok!(runner.await.unwrap());
    }
}
