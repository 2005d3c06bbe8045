//! Routing of inbound `order` envelopes to command handlers.
//!
//! The [`Dispatcher`] keeps one handler per [`CommandKind`]. A handler may
//! answer immediately ([`Outcome::Reply`]), stay quiet ([`Outcome::Silent`]),
//! or push its work onto the [`TaskPool`] and answer from there
//! ([`Outcome::Spawned`]). Handler failures end here: they are logged and
//! audited, never surfaced to the channel.

pub mod handlers;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::audit::{AuditLevel, AuditLog};
use crate::envelope::{Envelope, ORDER_TAG};
use crate::error::{TaskError, TetherError};
use crate::message::{Command, CommandKind};
use crate::network::EnvelopeSink;
use crate::protocol::Response;
use crate::task::{TaskId, TaskPool};

pub use handlers::{DeviceHandler, RemoteControlHandler, install_defaults};

/// What a handler did with a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send this response on the command kind's tag.
    Reply(Response),
    /// Nothing to send.
    Silent,
    /// Work continues in a task, which replies on its own.
    Spawned(TaskId),
}

/// Everything a handler may need besides the command itself.
#[derive(Clone)]
pub struct HandlerContext {
    sink: Arc<dyn EnvelopeSink>,
    tasks: Arc<TaskPool>,
}

impl HandlerContext {
    pub fn new(sink: Arc<dyn EnvelopeSink>, tasks: Arc<TaskPool>) -> Self {
        Self { sink, tasks }
    }

    pub fn sink(&self) -> &Arc<dyn EnvelopeSink> {
        &self.sink
    }

    pub fn tasks(&self) -> &Arc<TaskPool> {
        &self.tasks
    }

    /// Send `response` on `kind`'s tag.
    pub async fn reply(&self, kind: CommandKind, response: &Response) -> Result<(), TetherError> {
        self.sink.send(kind.tag(), response.to_bytes()?).await
    }

    /// Run `work` as a named task and send its response on `kind`'s tag
    /// when it completes. Cancelling the task drops the work unanswered.
    pub fn spawn_reply<Fut>(&self, name: &str, kind: CommandKind, work: Fut) -> TaskId
    where
        Fut: Future<Output = Result<Response, TetherError>> + Send + 'static,
    {
        let sink = Arc::clone(&self.sink);
        self.tasks.spawn(name, move |token| async move {
            let response = tokio::select! {
                _ = token.cancelled() => return Err(TaskError::Cancelled.into()),
                r = work => r?,
            };
            sink.send(kind.tag(), response.to_bytes()?).await
        })
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command, ctx: &HandlerContext) -> Result<Outcome, TetherError>;
}

// ── Dispatcher ───────────────────────────────────────────────────

pub struct Dispatcher {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
    ctx: HandlerContext,
    audit: Option<Arc<dyn AuditLog>>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn EnvelopeSink>, tasks: Arc<TaskPool>) -> Self {
        Self {
            handlers: HashMap::new(),
            ctx: HandlerContext::new(sink, tasks),
            audit: None,
        }
    }

    /// Record accepted commands and handler failures in `audit`.
    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Route `kind` to `handler`, replacing any previous registration.
    pub fn register(&mut self, kind: CommandKind, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn is_registered(&self, kind: CommandKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Handle one inbound (already opened) envelope.
    ///
    /// Returns what the handler did, or `None` when the envelope was
    /// dropped or the handler failed.
    pub async fn on_envelope(&self, envelope: Envelope) -> Option<Outcome> {
        if envelope.tag != ORDER_TAG {
            debug!(tag = %envelope.tag, "ignoring non-order envelope");
            return None;
        }

        let command = match Command::decode(&envelope.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "dropping undecodable order");
                self.audit(AuditLevel::Warn, &format!("rejected order: {e}"));
                return None;
            }
        };

        let kind = command.kind();
        let Some(handler) = self.handlers.get(&kind).cloned() else {
            warn!(%command, "no handler registered");
            return None;
        };

        info!(%command, "dispatching");
        self.audit(AuditLevel::Info, &format!("command {command}"));

        match handler.handle(command.clone(), &self.ctx).await {
            Ok(Outcome::Reply(response)) => {
                if let Err(e) = self.ctx.reply(kind, &response).await {
                    warn!(%command, error = %e, "failed to send reply");
                }
                Some(Outcome::Reply(response))
            }
            Ok(Outcome::Spawned(id)) => {
                debug!(%command, task = %id, "command running in background");
                Some(Outcome::Spawned(id))
            }
            Ok(Outcome::Silent) => Some(Outcome::Silent),
            Err(e) => {
                warn!(%command, error = %e, "command failed");
                self.audit(AuditLevel::Error, &format!("{command} failed: {e}"));
                None
            }
        }
    }

    fn audit(&self, level: AuditLevel, message: &str) {
        let Some(audit) = &self.audit else {
            return;
        };
        let Some(session) = audit.active_session() else {
            return;
        };
        if let Err(e) = audit.append(session, level, message) {
            debug!(error = %e, "audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Bytes)>>,
    }

    #[async_trait]
    impl EnvelopeSink for RecordingSink {
        async fn send(&self, tag: &str, payload: Bytes) -> Result<(), TetherError> {
            self.sent.lock().unwrap().push((tag.to_string(), payload));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct Fixed(Result<Outcome, &'static str>, AtomicUsize);

    #[async_trait]
    impl CommandHandler for Fixed {
        async fn handle(&self, _: Command, _: &HandlerContext) -> Result<Outcome, TetherError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone().map_err(TetherError::from)
        }
    }

    fn order(body: &str) -> Envelope {
        Envelope::new(ORDER_TAG, body.to_string())
    }

    fn dispatcher() -> (Dispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let d = Dispatcher::new(sink.clone(), Arc::new(TaskPool::new()));
        (d, sink)
    }

    #[tokio::test]
    async fn reply_goes_out_on_the_kind_tag() {
        let (mut d, sink) = dispatcher();
        let reply = Response::ok("fine");
        d.register(
            CommandKind::Contacts,
            Arc::new(Fixed(Ok(Outcome::Reply(reply.clone())), AtomicUsize::new(0))),
        );

        let outcome = d.on_envelope(order(r#"{"order":"x0000cn"}"#)).await;
        assert_eq!(outcome, Some(Outcome::Reply(reply.clone())));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "x0000cn");
        assert_eq!(Response::from_bytes(&sent[0].1).unwrap(), reply);
    }

    #[tokio::test]
    async fn silent_and_failed_handlers_send_nothing() {
        let (mut d, sink) = dispatcher();
        d.register(
            CommandKind::Contacts,
            Arc::new(Fixed(Ok(Outcome::Silent), AtomicUsize::new(0))),
        );
        d.register(
            CommandKind::CallLogs,
            Arc::new(Fixed(Err("device busy"), AtomicUsize::new(0))),
        );

        assert_eq!(
            d.on_envelope(order(r#"{"order":"x0000cn"}"#)).await,
            Some(Outcome::Silent)
        );
        assert_eq!(d.on_envelope(order(r#"{"order":"x0000cl"}"#)).await, None);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_foreign_envelopes_are_dropped() {
        let (mut d, sink) = dispatcher();
        let handler = Arc::new(Fixed(Ok(Outcome::Silent), AtomicUsize::new(0)));
        d.register(CommandKind::RemoteControl, handler.clone());

        for env in [
            order("not json"),
            order(r#"{"order":"x9999zz"}"#),
            order(r#"{"order":"x0000rc","extra":"dance"}"#),
            order(r#"{"order":"x0000rc","extra":"touch","x":1}"#),
            Envelope::new("x0000rc", r#"{"order":"x0000rc","extra":"start"}"#),
        ] {
            assert_eq!(d.on_envelope(env).await, None);
        }
        assert_eq!(handler.1.load(Ordering::SeqCst), 0);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_kind_is_dropped() {
        let (d, sink) = dispatcher();
        assert!(!d.is_registered(CommandKind::Sms));
        assert_eq!(d.on_envelope(order(r#"{"order":"x0000sm","extra":"ls"}"#)).await, None);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawn_reply_answers_from_the_task() {
        let (d, sink) = dispatcher();
        let id = d
            .context()
            .spawn_reply("slow", CommandKind::Mic, async {
                Ok::<_, TetherError>(Response::ok("done"))
            });
        d.context().tasks().join(id).await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "x0000mc");
    }

    #[tokio::test]
    async fn cancelled_spawn_reply_stays_silent() {
        let (d, sink) = dispatcher();
        let id = d.context().spawn_reply("never", CommandKind::Mic, async {
            std::future::pending::<()>().await;
            Ok::<_, TetherError>(Response::ok("unreachable"))
        });
        assert!(d.context().tasks().cancel(id));
        d.context().tasks().join(id).await.unwrap();
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn accepted_commands_and_failures_are_audited() {
        let sink = Arc::new(RecordingSink::default());
        let audit = Arc::new(MemoryAuditLog::new());
        let session = audit.open_session("tok").unwrap();
        let mut d = Dispatcher::new(sink, Arc::new(TaskPool::new())).with_audit(audit.clone());
        d.register(
            CommandKind::CallLogs,
            Arc::new(Fixed(Err("denied"), AtomicUsize::new(0))),
        );

        d.on_envelope(order(r#"{"order":"x0000cl"}"#)).await;
        d.on_envelope(order("{")).await;

        let levels: Vec<_> = audit.logs_for(session).into_iter().map(|r| r.level).collect();
        assert_eq!(
            levels,
            [AuditLevel::Warn, AuditLevel::Error, AuditLevel::Info]
        );
    }
}
