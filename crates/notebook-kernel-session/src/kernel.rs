//! Kernel task: owns the session and serializes request handling.

use std::{ops::ControlFlow, path::Path, sync::Arc};

use notebook_kernel_core::{
    ChannelName, ConfigError, ConnectionConfig, Envelope, ExecutionEngine, InterruptHandle,
    MessageCodec, MessageContent, message::InterruptRequest,
};
use notebook_kernel_transport::{
    ChannelBus, ChannelSet, Endpoint, Subscription, TransportError, heartbeat::spawn_echo,
};
use tokio::{sync::Notify, task::JoinHandle};

use crate::{
    handlers::{self, Outbound},
    request::Request,
    session::Session,
};

/// Username stamped on every header the kernel produces.
pub const KERNEL_USERNAME: &str = "kernel";

/// Kernel startup error.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Requests the kernel loop to stop and tear down its channels.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.notify_one();
    }
}

/// A running kernel: session, engine and the buses it serves.
///
/// Shell and control requests are handled one at a time on the task that
/// calls [`Kernel::run`]. Control interrupts, when the engine supports them,
/// are answered by a separate control listener so they can land
/// mid-execution. An interrupt sent on shell is answered in turn on shell.
pub struct Kernel<E: ExecutionEngine> {
    engine: E,
    session: Session<E::Context>,
    out: Outbound,
    shell: ChannelBus,
    control: ChannelBus,
    stdin: ChannelBus,
    shell_rx: Subscription,
    control_rx: Subscription,
    interrupt: Option<InterruptHandle>,
    interrupts: Option<JoinHandle<()>>,
    heartbeat: Arc<Endpoint>,
    heartbeat_task: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl<E: ExecutionEngine> Kernel<E> {
    /// Wire a kernel onto an open channel set.
    ///
    /// Subscribes to shell and control immediately, so requests sent after
    /// this returns are observed even before [`Kernel::run`] starts. Must be
    /// called within a Tokio runtime.
    #[must_use]
    pub fn new(channels: &ChannelSet, codec: MessageCodec, engine: E) -> Self {
        let bus = |channel: ChannelName| {
            ChannelBus::new(Arc::clone(channels.endpoint(channel)), codec.clone())
        };
        let shell = bus(ChannelName::Shell);
        let control = bus(ChannelName::Control);
        let stdin = bus(ChannelName::Stdin);
        let iopub = bus(ChannelName::Iopub);

        let session = Session::new();
        let out = Outbound::new(session.id(), KERNEL_USERNAME, iopub);

        let shell_rx = shell.subscribe();
        let control_rx = control.subscribe();
        let interrupt = engine.interrupt_handle();
        let interrupts = interrupt
            .clone()
            .map(|handle| spawn_interrupt_listener(out.clone(), control.clone(), handle));

        let heartbeat = Arc::clone(channels.endpoint(ChannelName::Heartbeat));
        let heartbeat_task = spawn_echo(Arc::clone(&heartbeat));

        tracing::info!(session = %session.id(), interrupts = interrupts.is_some(), "Kernel ready");

        Self {
            engine,
            session,
            out,
            shell,
            control,
            stdin,
            shell_rx,
            control_rx,
            interrupt,
            interrupts,
            heartbeat,
            heartbeat_task,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Bind every channel the config describes and wire a kernel onto them.
    ///
    /// # Errors
    /// Returns error if any endpoint fails to bind.
    pub async fn bind(config: &ConnectionConfig, engine: E) -> Result<Self, KernelError> {
        let channels = ChannelSet::open(config).await?;
        Ok(Self::new(&channels, MessageCodec::from_config(config), engine))
    }

    /// Load a connection file, then [`Kernel::bind`].
    ///
    /// # Errors
    /// Returns error if the file is unreadable or invalid, or binding fails.
    pub async fn from_connection_file(path: impl AsRef<Path>, engine: E) -> Result<Self, KernelError> {
        let config = ConnectionConfig::from_file(path)?;
        Self::bind(&config, engine).await
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Handle requests until shut down, then tear every channel down.
    pub async fn run(mut self) {
        loop {
            let (channel, envelope) = tokio::select! {
                biased;
                () = self.shutdown.notified() => {
                    tracing::info!("Shutdown signalled");
                    break;
                }
                Some(envelope) = self.control_rx.recv() => (ChannelName::Control, envelope),
                Some(envelope) = self.shell_rx.recv() => (ChannelName::Shell, envelope),
                else => break,
            };

            if self.dispatch(channel, &envelope).is_break() {
                break;
            }
        }

        self.teardown().await;
    }

    fn dispatch(&mut self, channel: ChannelName, envelope: &Envelope) -> ControlFlow<()> {
        let request = match Request::from_envelope(envelope) {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(%channel, msg_type = envelope.msg_type(), "Unhandled message type");
                return ControlFlow::Continue(());
            }
            Err(e) => {
                tracing::warn!(%channel, "Skipping request: {e}");
                return ControlFlow::Continue(());
            }
        };
        tracing::debug!(%channel, msg_type = request.msg_type(), "Handling request");

        let bus = match channel {
            ChannelName::Control => &self.control,
            _ => &self.shell,
        };
        match request {
            Request::KernelInfo(_) => handlers::kernel_info(&self.out, bus, envelope, &self.engine),
            Request::IsComplete(content) => handlers::is_complete(&self.out, bus, envelope, &content),
            Request::Execute(content) => handlers::execute(
                &self.out,
                bus,
                envelope,
                &content,
                &mut self.session,
                &mut self.engine,
            ),
            Request::Shutdown(content) => {
                handlers::shutdown(&self.out, bus, envelope, &content);
                return ControlFlow::Break(());
            }
            Request::Interrupt(_) => match &self.interrupt {
                // Answered by the interrupt listener.
                Some(_) if channel == ChannelName::Control => {}
                Some(handle) => handlers::interrupt(&self.out, bus, envelope, handle),
                None => {
                    tracing::warn!(%channel, "Engine does not support interrupts, ignoring request");
                }
            },
        }
        ControlFlow::Continue(())
    }

    async fn teardown(self) {
        let Self {
            out,
            shell,
            control,
            stdin,
            shell_rx,
            control_rx,
            interrupts,
            heartbeat,
            heartbeat_task,
            ..
        } = self;

        for bus in [&shell, &control, &stdin, out.iopub()] {
            bus.teardown().await;
        }
        drop((shell_rx, control_rx));

        if let Some(task) = interrupts {
            if let Err(e) = task.await {
                tracing::warn!("Interrupt listener ended abnormally: {e}");
            }
        }

        heartbeat.close().await;
        if let Err(e) = heartbeat_task.await {
            tracing::warn!("Heartbeat ended abnormally: {e}");
        }

        tracing::info!("Kernel stopped");
    }
}

fn spawn_interrupt_listener(
    out: Outbound,
    control: ChannelBus,
    handle: InterruptHandle,
) -> JoinHandle<()> {
    let mut requests = control.subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = requests.recv().await {
            if envelope.msg_type() == InterruptRequest::MSG_TYPE {
                handlers::interrupt(&out, &control, &envelope, &handle);
            }
        }
        tracing::debug!("Interrupt listener stopped");
    })
}
