//! Request handlers.
//!
//! Every message produced here is a child of the triggering request: its
//! `parent_header` is the request's header. Send failures are logged and never
//! propagate.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use notebook_kernel_core::{
    DisplayData, DisplayHook, DisplayOptions, Envelope, Evaluation, ExecutionEngine,
    ExecutionError, InterruptHandle, MessageContent,
    message::{
        DisplayDataContent, ErrorContent, ExecuteInput, ExecuteReply, ExecuteRequest,
        ExecuteResult, ExecutionState, InterruptReply, IsCompleteReply, IsCompleteRequest,
        KernelInfoReply, PROTOCOL_VERSION, ReplyStatus, ShutdownReply, ShutdownRequest, Status,
        Transient, UpdateDisplayDataContent,
    },
};
use notebook_kernel_transport::ChannelBus;
use serde_json::Map;

use crate::session::Session;

/// Identity stamped on outbound headers plus the broadcast bus.
#[derive(Clone)]
pub struct Outbound {
    session_id: String,
    username: String,
    iopub: ChannelBus,
}

impl Outbound {
    #[must_use]
    pub fn new(session_id: impl Into<String>, username: impl Into<String>, iopub: ChannelBus) -> Self {
        Self {
            session_id: session_id.into(),
            username: username.into(),
            iopub,
        }
    }

    #[must_use]
    pub const fn iopub(&self) -> &ChannelBus {
        &self.iopub
    }

    /// Reply to `parent` on `bus`, routed back to the requester.
    pub fn reply<C: MessageContent>(&self, bus: &ChannelBus, parent: &Envelope, content: &C) {
        match Envelope::reply_to(parent, content, &self.session_id, &self.username) {
            Ok(envelope) => send(bus, &envelope),
            Err(e) => tracing::error!(msg_type = C::MSG_TYPE, "Failed to build reply: {e}"),
        }
    }

    /// Broadcast a child of `parent` on iopub.
    pub fn publish<C: MessageContent>(&self, parent: &Envelope, content: &C) {
        match Envelope::broadcast(parent, content, &self.session_id, &self.username) {
            Ok(envelope) => send(&self.iopub, &envelope),
            Err(e) => tracing::error!(msg_type = C::MSG_TYPE, "Failed to build broadcast: {e}"),
        }
    }

    fn status(&self, parent: &Envelope, execution_state: ExecutionState) {
        self.publish(parent, &Status { execution_state });
    }
}

fn send(bus: &ChannelBus, envelope: &Envelope) {
    if let Err(e) = bus.send(envelope) {
        tracing::warn!(channel = %bus.channel(), msg_type = envelope.msg_type(), "Send failed: {e}");
    }
}

/// Static capability and version metadata.
pub fn kernel_info<E: ExecutionEngine>(
    out: &Outbound,
    bus: &ChannelBus,
    request: &Envelope,
    engine: &E,
) {
    let reply = KernelInfoReply {
        status: ReplyStatus::Ok,
        protocol_version: PROTOCOL_VERSION.to_string(),
        implementation: env!("CARGO_PKG_NAME").to_string(),
        implementation_version: env!("CARGO_PKG_VERSION").to_string(),
        language_info: engine.language_info(),
        banner: engine.banner(),
        help_links: Vec::new(),
    };
    out.reply(bus, request, &reply);
}

/// Every input is reported complete.
pub fn is_complete(out: &Outbound, bus: &ChannelBus, request: &Envelope, _content: &IsCompleteRequest) {
    out.reply(
        bus,
        request,
        &IsCompleteReply {
            status: "complete".to_string(),
        },
    );
}

/// Run one execute request to completion.
///
/// Event order: `execute_input`, `execute_reply`, `status: busy`, any display
/// output, then exactly one of `execute_result` or `error`, then
/// `status: idle`.
pub fn execute<E: ExecutionEngine>(
    out: &Outbound,
    bus: &ChannelBus,
    request: &Envelope,
    content: &ExecuteRequest,
    session: &mut Session<E::Context>,
    engine: &mut E,
) {
    let execution_count = session.begin_execute();
    tracing::debug!(execution_count, "Executing");

    out.publish(
        request,
        &ExecuteInput {
            code: content.code.clone(),
            execution_count,
        },
    );
    out.reply(
        bus,
        request,
        &ExecuteReply {
            status: ReplyStatus::Ok,
            execution_count,
        },
    );
    out.status(request, ExecutionState::Busy);

    let mut display = IopubDisplay {
        out,
        parent: request,
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        engine.evaluate(&content.code, session.context_mut(), &mut display)
    }))
    .unwrap_or_else(|payload| Err(engine_panic(payload.as_ref())));
    match outcome {
        Ok(evaluation) => {
            let mut data = Map::new();
            if let Evaluation::Value(text) = evaluation {
                data.insert("text/plain".to_string(), serde_json::Value::String(text));
            }
            out.publish(
                request,
                &ExecuteResult {
                    execution_count,
                    data,
                    metadata: Map::new(),
                },
            );
        }
        Err(e) => {
            tracing::info!(execution_count, ename = %e.name, "Execution failed");
            out.publish(
                request,
                &ErrorContent {
                    ename: e.name,
                    evalue: e.message,
                    traceback: e.traceback,
                },
            );
        }
    }

    out.status(request, ExecutionState::Idle);
    session.finish_execute();
}

/// A panic inside the engine is reported as a failed execution.
fn engine_panic(payload: &(dyn Any + Send)) -> ExecutionError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "engine panicked".to_string());
    tracing::error!("Engine panicked: {message}");
    ExecutionError::new("InternalError", message)
}

/// Acknowledge a shutdown on the channel it arrived on.
pub fn shutdown(out: &Outbound, bus: &ChannelBus, request: &Envelope, content: &ShutdownRequest) {
    tracing::info!(restart = content.restart, "Shutdown requested");
    out.reply(
        bus,
        request,
        &ShutdownReply {
            status: ReplyStatus::Ok,
            restart: content.restart,
        },
    );
}

/// Trip the engine's interrupt flag and acknowledge.
pub fn interrupt(out: &Outbound, bus: &ChannelBus, request: &Envelope, handle: &InterruptHandle) {
    handle.trigger();
    tracing::info!("Interrupt requested");
    out.reply(
        bus,
        request,
        &InterruptReply {
            status: ReplyStatus::Ok,
        },
    );
}

/// Display capability scoped to one execute request.
struct IopubDisplay<'a> {
    out: &'a Outbound,
    parent: &'a Envelope,
}

impl DisplayHook for IopubDisplay<'_> {
    fn display(&mut self, data: DisplayData, options: DisplayOptions) {
        let content = DisplayDataContent {
            data: data.into_bundle(),
            metadata: Map::new(),
            transient: options.display_id.map(|display_id| Transient { display_id }),
        };
        if options.update && content.transient.is_some() {
            self.out
                .publish(self.parent, &UpdateDisplayDataContent(content));
        } else {
            if options.update {
                tracing::debug!("Display update without a display id, sending as new output");
            }
            self.out.publish(self.parent, &content);
        }
    }
}
