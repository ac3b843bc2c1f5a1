//! Inbound event dispatch.
//!
//! Runs continuously on its own task, driven by the peer's message stream.
//! Handlers may issue further peer requests (the stopped handler does) but
//! never perform long host-side work inline; host notifications go out
//! through the session's channel.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use crate::breakpoints::ReconcileOutcome;
use crate::communication::DispatchItem;
use crate::modules::ModuleOutcome;
use crate::protocol::{
    BreakpointEventBody, ContinuedEventBody, EventMessage, ExitedEventBody, ModuleEventBody,
    OutputEventBody, StackTraceResponseBody, StoppedEventBody, ThreadsResponseBody,
};
use crate::types::{DriverEvent, OutputChannel, StopNotification};
use crate::{Shared, QUERY_TIMEOUT};

pub(crate) struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        EventDispatcher { shared }
    }

    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<DispatchItem>) {
        log::debug!("event dispatcher started");
        while let Some(item) = rx.recv().await {
            match item {
                DispatchItem::Event(event) => self.handle_event(event).await,
                DispatchItem::PeerRequest(request) => {
                    log::debug!("rejecting reverse request '{}'", request.command);
                    if let Err(err) = self.shared.comm.reject_peer_request(&request).await {
                        log::warn!("failed to answer reverse request: {err}");
                    }
                }
            }
        }
        log::debug!("event dispatcher stopped");
    }

    async fn handle_event(&self, event: EventMessage) {
        match event.event.as_str() {
            "initialized" => {
                self.shared.initialized.send_replace(true);
            }
            "output" => match serde_json::from_value::<OutputEventBody>(event.body) {
                Ok(body) => {
                    self.shared.notify(DriverEvent::Output {
                        channel: output_channel(body.category.as_deref()),
                        text: body.output,
                    });
                }
                Err(err) => log::warn!("bad output event body: {err}"),
            },
            "stopped" => match serde_json::from_value::<StoppedEventBody>(event.body) {
                Ok(body) => self.handle_stopped(body).await,
                Err(err) => log::warn!("bad stopped event body: {err}"),
            },
            "continued" => match serde_json::from_value::<ContinuedEventBody>(event.body) {
                Ok(body) => {
                    self.shared.frame.lock().unwrap().take();
                    self.shared.notify(DriverEvent::Continued {
                        thread_id: body.thread_id,
                        all_threads: body.all_threads_continued.unwrap_or(false),
                    });
                }
                Err(err) => log::warn!("bad continued event body: {err}"),
            },
            "exited" => match serde_json::from_value::<ExitedEventBody>(event.body) {
                Ok(body) => self.shared.notify(DriverEvent::Exited {
                    exit_code: body.exit_code,
                }),
                Err(err) => log::warn!("bad exited event body: {err}"),
            },
            "terminated" => self.shared.notify(DriverEvent::Terminated),
            "breakpoint" => match serde_json::from_value::<BreakpointEventBody>(event.body) {
                Ok(body) => self.handle_breakpoint(body),
                Err(err) => log::warn!("bad breakpoint event body: {err}"),
            },
            "module" => match serde_json::from_value::<ModuleEventBody>(event.body) {
                Ok(body) => self.handle_module(body),
                Err(err) => log::warn!("bad module event body: {err}"),
            },
            "thread" | "process" | "loadedSource" | "capabilities" => {
                log::debug!("ignoring '{}' event", event.event);
            }
            other => log::debug!("unhandled '{other}' event"),
        }
    }

    /// Build the stop notification. The protocol has no single-thread
    /// lookup, so every stop lists all threads and picks the event's thread
    /// id, or the lowest id when unspecified; that thread's top frame comes
    /// from a one-level stack trace.
    async fn handle_stopped(&self, body: StoppedEventBody) {
        // The frame context is gone; variable handles die with it.
        self.shared.frame.lock().unwrap().take();

        let mut threads = match self
            .shared
            .comm
            .request_with_timeout("threads", json!({}), QUERY_TIMEOUT)
            .await
            .and_then(|v| Ok(serde_json::from_value::<ThreadsResponseBody>(v)?))
        {
            Ok(body) => body.threads,
            Err(err) => {
                log::warn!("thread fetch after stop failed: {err}");
                Vec::new()
            }
        };
        threads.sort_by_key(|t| t.id);

        let thread = match body.thread_id {
            Some(id) => threads
                .iter()
                .find(|t| t.id == id)
                .or_else(|| threads.first())
                .cloned(),
            None => threads.first().cloned(),
        };

        let frame = match &thread {
            Some(thread) => {
                let request = self.shared.comm.request(
                    "stackTrace",
                    json!({ "threadId": thread.id, "startFrame": 0, "levels": 1 }),
                );
                match request
                    .await
                    .and_then(|v| Ok(serde_json::from_value::<StackTraceResponseBody>(v)?))
                {
                    Ok(body) => body.stack_frames.into_iter().next(),
                    Err(err) => {
                        log::warn!("top frame fetch after stop failed: {err}");
                        None
                    }
                }
            }
            None => None,
        };

        let breakpoint = if body.reason == "breakpoint" {
            body.hit_breakpoint_ids
                .as_ref()
                .and_then(|ids| ids.first())
                .and_then(|id| self.shared.breakpoints.lock().unwrap().get(*id).cloned())
        } else {
            None
        };

        self.shared.notify(DriverEvent::Stopped(StopNotification {
            reason: body.reason,
            description: body.description,
            thread,
            frame,
            breakpoint,
            all_threads_stopped: body.all_threads_stopped.unwrap_or(false),
        }));
    }

    fn handle_breakpoint(&self, body: BreakpointEventBody) {
        let outcome = self
            .shared
            .breakpoints
            .lock()
            .unwrap()
            .reconcile(&body.reason, &body.breakpoint);
        match outcome {
            ReconcileOutcome::Added(bp) => {
                let resolved = bp.location.clone().map(|location| (bp.id, location));
                self.shared.notify(DriverEvent::BreakpointAdded(bp));
                if let Some((Some(id), location)) = resolved {
                    self.shared
                        .notify(DriverEvent::BreakpointResolved { id, location });
                }
            }
            ReconcileOutcome::Changed(bp) => {
                let resolved = bp.location.clone().map(|location| (bp.id, location));
                self.shared.notify(DriverEvent::BreakpointChanged(bp));
                if let Some((Some(id), location)) = resolved {
                    self.shared
                        .notify(DriverEvent::BreakpointResolved { id, location });
                }
            }
            ReconcileOutcome::Removed(id) => {
                self.shared.notify(DriverEvent::BreakpointRemoved { id });
            }
            ReconcileOutcome::Ignored => {}
        }
    }

    fn handle_module(&self, body: ModuleEventBody) {
        let outcome = self
            .shared
            .modules
            .lock()
            .unwrap()
            .apply(&body.reason, body.module);
        match outcome {
            ModuleOutcome::Loaded(module) => self.shared.notify(DriverEvent::ModuleLoaded(module)),
            ModuleOutcome::Changed(module) => {
                self.shared.notify(DriverEvent::ModuleChanged(module))
            }
            ModuleOutcome::Unloaded(id) => self.shared.notify(DriverEvent::ModuleUnloaded { id }),
            ModuleOutcome::Ignored => {}
        }
    }
}

/// Route peer output by category: debuggee stdout and stderr keep their
/// channels, everything else (console, telemetry, unknown) is debugger
/// chatter.
fn output_channel(category: Option<&str>) -> OutputChannel {
    match category {
        Some("stdout") => OutputChannel::DebuggeeStdout,
        Some("stderr") => OutputChannel::DebuggeeStderr,
        _ => OutputChannel::Debugger,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_category_routing() {
        assert_eq!(output_channel(Some("stdout")), OutputChannel::DebuggeeStdout);
        assert_eq!(output_channel(Some("stderr")), OutputChannel::DebuggeeStderr);
        assert_eq!(output_channel(Some("console")), OutputChannel::Debugger);
        assert_eq!(output_channel(Some("telemetry")), OutputChannel::Debugger);
        assert_eq!(output_channel(None), OutputChannel::Debugger);
    }
}
