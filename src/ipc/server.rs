//! Local control server
//!
//! Unix domain socket on Unix, named pipe on Windows. Each connection is
//! request/response; after `subscribe` the connection also receives pushed
//! outcome events.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{
    DaemonStatus, ErrorCode, Notification, Request, Response, MAX_FRAME_LEN,
};
use crate::actions::{ActionDispatcher, Binding, BindingError, Origin, SlotSink};
use crate::events::ActionEvent;
use crate::hotkey::{HookEngine, Slot};
use crate::store::JsonFileStore;

/// Everything a request handler may touch
pub struct ServerContext {
    pub dispatcher: Arc<ActionDispatcher>,
    pub sink: Arc<dyn SlotSink>,
    pub engine: Arc<HookEngine>,
    pub store: Option<Arc<JsonFileStore>>,
    pub events: broadcast::Sender<ActionEvent>,
    pub start_time: Instant,
}

/// IPC server handling client connections
pub struct Server {
    endpoint: PathBuf,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    #[cfg(windows)]
    first_pipe: std::sync::Mutex<Option<tokio::net::windows::named_pipe::NamedPipeServer>>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the control endpoint
    #[cfg(unix)]
    pub fn bind(endpoint: &Path, context: Arc<ServerContext>) -> Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        if let Some(parent) = endpoint.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if endpoint.exists() {
            std::fs::remove_file(endpoint).context("failed to remove stale socket")?;
        }

        let listener =
            tokio::net::UnixListener::bind(endpoint).context("failed to bind Unix socket")?;

        // Owner-only access
        std::fs::set_permissions(endpoint, std::fs::Permissions::from_mode(0o600))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        info!(endpoint = %endpoint.display(), "IPC server listening");

        Ok(Self {
            endpoint: endpoint.to_owned(),
            listener,
            context,
            shutdown_tx,
        })
    }

    /// Bind the control endpoint
    #[cfg(windows)]
    pub fn bind(endpoint: &Path, context: Arc<ServerContext>) -> Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .create(endpoint)
            .context("failed to create named pipe")?;

        let (shutdown_tx, _) = broadcast::channel(1);
        info!(endpoint = %endpoint.display(), "IPC server listening");

        Ok(Self {
            endpoint: endpoint.to_owned(),
            first_pipe: std::sync::Mutex::new(Some(first)),
            context,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    #[cfg(unix)]
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    self.spawn_client(stream);
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Run the server, accepting connections
    #[cfg(windows)]
    pub async fn run(&self) -> Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let mut pipe = self
            .first_pipe
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .context("server is already running")?;

        loop {
            pipe.connect().await.context("named pipe connect failed")?;
            debug!("client connected");
            let client = pipe;
            pipe = ServerOptions::new()
                .create(&self.endpoint)
                .context("failed to create named pipe")?;
            self.spawn_client(client);
        }
    }

    fn spawn_client<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                result = handle_client(stream, context) => {
                    if let Err(e) = result {
                        warn!(?e, "client handler error");
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("client handler shutting down");
                }
            }
        });
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        #[cfg(unix)]
        {
            if self.endpoint.exists() {
                if let Err(e) = std::fs::remove_file(&self.endpoint) {
                    warn!(?e, "failed to remove socket file");
                }
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Aborts the event forwarder when the connection goes away
struct Subscription(JoinHandle<()>);

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle a single client connection
async fn handle_client<S>(stream: S, context: Arc<ServerContext>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Responses and pushed events share one ordered writer
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            write_frame(&mut writer, &frame).await?;
        }
        writer.shutdown().await
    });

    let mut subscription = None;

    let result: Result<()> = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("client disconnected");
                break Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "dropping client");
                break Ok(());
            }
            Err(e) => break Err(e.into()),
        };

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => {
                debug!(?request, "received request");
                let (response, subscribe) = process_request(request, &context).await;
                if subscribe && subscription.is_none() {
                    debug!("client subscribed to notifications");
                    subscription = Some(Subscription(forward_events(&context, out_tx.clone())));
                }
                response
            }
            Err(e) => Response::error(ErrorCode::InvalidRequest, e.to_string()),
        };

        if out_tx.send(serde_json::to_vec(&response)?).is_err() {
            break Ok(());
        }
    };

    drop(subscription);
    drop(out_tx);
    match writer_task.await {
        Ok(Err(e)) if e.kind() != io::ErrorKind::BrokenPipe => debug!(error = %e, "write failed"),
        _ => {}
    }

    result
}

/// Push outcome events to a subscribed client
fn forward_events(context: &ServerContext, out: mpsc::UnboundedSender<Vec<u8>>) -> JoinHandle<()> {
    let mut events = context.events.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(frame) = serde_json::to_vec(&Notification::Event { event }) else {
                        continue;
                    };
                    if out.send(frame).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Process a request and return a response
/// Returns (Response, should_subscribe)
async fn process_request(request: Request, context: &Arc<ServerContext>) -> (Response, bool) {
    let response = match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hook_running: context.engine.is_running(),
            bound_slots: context.dispatcher.snapshot().len(),
            uptime_secs: context.start_time.elapsed().as_secs(),
        }),

        Request::ListBindings => Response::Bindings {
            bindings: context.dispatcher.snapshot().to_records(),
        },

        Request::SetBinding { slot, binding } => {
            blocking(context, move |context| {
                let result = Slot::try_from(slot)
                    .map_err(BindingError::from)
                    .and_then(|s| Ok((s, Binding::try_from(binding)?)))
                    .and_then(|(s, binding)| context.dispatcher.set_binding(s, binding));
                match result {
                    Ok(()) => Response::BindingUpdated { slot },
                    Err(e) => binding_error(&e),
                }
            })
            .await
        }

        Request::ClearBinding { slot } => {
            blocking(context, move |context| {
                let result = Slot::try_from(slot)
                    .map_err(BindingError::from)
                    .and_then(|s| context.dispatcher.clear_binding(s));
                match result {
                    Ok(()) => Response::BindingUpdated { slot },
                    Err(e) => binding_error(&e),
                }
            })
            .await
        }

        Request::Trigger { slot } => match Slot::try_from(slot) {
            Ok(s) => match context.sink.submit(s, Origin::Control) {
                Ok(()) => Response::Triggered { slot },
                Err(e) => Response::error(ErrorCode::QueueClosed, e.to_string()),
            },
            Err(e) => Response::error(ErrorCode::InvalidSlot, e.to_string()),
        },

        Request::ImportBindings { path } => {
            blocking(context, move |context| {
                let table = match JsonFileStore::read_from(&path) {
                    Ok(table) => table,
                    Err(e) => return Response::error(ErrorCode::InvalidRequest, format!("{e:#}")),
                };
                let bound = table.len();
                match context.dispatcher.replace_table(table) {
                    Ok(()) => {
                        info!(src = %path.display(), bound, "bindings imported");
                        Response::Imported { bound }
                    }
                    Err(e) => binding_error(&e),
                }
            })
            .await
        }

        Request::ExportBindings { path } => {
            blocking(context, move |context| match &context.store {
                Some(store) => match store.export_to(&path) {
                    Ok(()) => Response::Exported { path },
                    Err(e) => Response::error(ErrorCode::PersistFailed, format!("{e:#}")),
                },
                None => no_store(),
            })
            .await
        }

        Request::Subscribe => return (Response::Subscribed, true),
    };

    (response, false)
}

/// Run a handler that touches the disk on the blocking pool
async fn blocking<F>(context: &Arc<ServerContext>, handler: F) -> Response
where
    F: FnOnce(&ServerContext) -> Response + Send + 'static,
{
    let context = Arc::clone(context);
    match tokio::task::spawn_blocking(move || handler(&context)).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "request handler failed");
            Response::error(ErrorCode::PersistFailed, "request handler failed")
        }
    }
}

fn binding_error(error: &BindingError) -> Response {
    Response::error(ErrorCode::from(error), error.to_string())
}

fn no_store() -> Response {
    Response::error(ErrorCode::PersistFailed, "no binding store configured")
}

/// Read one length-prefixed frame; `None` on clean end of stream
pub(crate) async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Send a length-prefixed frame
pub(crate) async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(frame.len() as u32).to_le_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::runtime::Handle;

    use super::*;
    use crate::actions::{BindingRecord, BindingTable, QueueClosed, RecordingLauncher};
    use crate::config::Timing;
    use crate::hotkey::RepeatScheduler;
    use crate::input::testing::RecordingInjector;
    use crate::input::{ComboSynthesizer, KeyInjector};
    use crate::store::BindingStore;

    /// Sink that records triggered slots
    #[derive(Default)]
    struct RecordingSink {
        slots: std::sync::Mutex<Vec<(Slot, Origin)>>,
        closed: bool,
    }

    impl SlotSink for RecordingSink {
        fn submit(&self, slot: Slot, origin: Origin) -> Result<(), QueueClosed> {
            if self.closed {
                return Err(QueueClosed);
            }
            self.slots.lock().unwrap().push((slot, origin));
            Ok(())
        }
    }

    struct Fixture {
        context: Arc<ServerContext>,
        sink: Arc<RecordingSink>,
        dir: tempfile::TempDir,
    }

    fn fixture(closed: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path().join("config.json")));
        let (events, _) = broadcast::channel(16);
        let combos = Arc::new(ComboSynthesizer::new(
            Some(Arc::new(RecordingInjector::default()) as Arc<dyn KeyInjector>),
            Duration::ZERO,
        ));
        let dispatcher = ActionDispatcher::new(
            BindingTable::defaults(),
            Arc::new(RecordingLauncher::default()),
            combos,
            Some(Arc::clone(&store) as Arc<dyn BindingStore>),
            events.clone(),
        );
        let sink = Arc::new(RecordingSink {
            closed,
            ..Default::default()
        });
        let engine = HookEngine::new(
            sink.clone(),
            RepeatScheduler::new(Handle::current()),
            Timing::default(),
            events.clone(),
        );

        let context = Arc::new(ServerContext {
            dispatcher: Arc::new(dispatcher),
            sink: sink.clone(),
            engine: Arc::new(engine),
            store: Some(store),
            events,
            start_time: Instant::now(),
        });
        Fixture {
            context,
            sink,
            dir,
        }
    }

    async fn ask(context: &Arc<ServerContext>, request: Request) -> Response {
        process_request(request, context).await.0
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fx = fixture(false);
        assert_eq!(ask(&fx.context, Request::Ping).await, Response::Pong);

        let Response::Status(status) = ask(&fx.context, Request::GetStatus).await else {
            panic!("expected status");
        };
        assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(status.bound_slots, 8);
        assert!(!status.hook_running);
    }

    #[tokio::test]
    async fn test_set_binding_validates() {
        let fx = fixture(false);

        let bad_combo = BindingRecord {
            name: "Broken".into(),
            key_combination: Some("ctrl+".into()),
            ..Default::default()
        };
        let response = ask(&fx.context, Request::SetBinding { slot: 6, binding: bad_combo }).await;
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidBinding,
                ..
            }
        ));

        let copy = BindingRecord {
            name: "Copy".into(),
            key_combination: Some("ctrl+c".into()),
            ..Default::default()
        };
        let response = ask(
            &fx.context,
            Request::SetBinding {
                slot: 99,
                binding: copy.clone(),
            },
        )
        .await;
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidSlot,
                ..
            }
        ));

        let response = ask(&fx.context, Request::SetBinding { slot: 6, binding: copy }).await;
        assert_eq!(response, Response::BindingUpdated { slot: 6 });
        assert_eq!(
            fx.context.dispatcher.binding(Slot::new(6).unwrap()).unwrap().name(),
            "Copy"
        );
    }

    #[tokio::test]
    async fn test_clear_and_list() {
        let fx = fixture(false);
        assert_eq!(
            ask(&fx.context, Request::ClearBinding { slot: 1 }).await,
            Response::BindingUpdated { slot: 1 }
        );

        let Response::Bindings { bindings } = ask(&fx.context, Request::ListBindings).await else {
            panic!("expected bindings");
        };
        assert!(!bindings.contains_key(&1));
        assert_eq!(bindings[&14].command.as_deref(), Some("__play_pause"));
    }

    #[tokio::test]
    async fn test_trigger_goes_through_the_queue() {
        let fx = fixture(false);
        assert_eq!(
            ask(&fx.context, Request::Trigger { slot: 3 }).await,
            Response::Triggered { slot: 3 }
        );
        assert_eq!(
            fx.sink.slots.lock().unwrap().as_slice(),
            &[(Slot::new(3).unwrap(), Origin::Control)]
        );

        let closed = fixture(true);
        assert!(matches!(
            ask(&closed.context, Request::Trigger { slot: 3 }).await,
            Response::Error {
                code: ErrorCode::QueueClosed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_export_then_import() {
        let fx = fixture(false);
        let store = fx.context.store.clone().unwrap();
        store.save_bindings(&fx.context.dispatcher.snapshot()).unwrap();

        let backup = fx.dir.path().join("backup.json");
        assert_eq!(
            ask(&fx.context, Request::ExportBindings { path: backup.clone() }).await,
            Response::Exported {
                path: backup.clone()
            }
        );

        fx.context.dispatcher.replace_table(BindingTable::new()).unwrap();
        let mut events = fx.context.events.subscribe();
        assert_eq!(
            ask(&fx.context, Request::ImportBindings { path: backup }).await,
            Response::Imported { bound: 8 }
        );
        assert_eq!(fx.context.dispatcher.snapshot().len(), 8);

        // Persisted through the dispatcher, and announced per slot
        assert_eq!(store.load_bindings().unwrap().unwrap().len(), 8);
        let mut changed = 0;
        while let Ok(ActionEvent::BindingChanged { name, .. }) = events.try_recv() {
            assert!(name.is_some());
            changed += 1;
        }
        assert_eq!(changed, 8);
    }

    #[tokio::test]
    async fn test_import_of_missing_file_changes_nothing() {
        let fx = fixture(false);
        let response = ask(
            &fx.context,
            Request::ImportBindings {
                path: fx.dir.path().join("nope.json"),
            },
        )
        .await;
        assert!(matches!(
            response,
            Response::Error {
                code: ErrorCode::InvalidRequest,
                ..
            }
        ));
        assert_eq!(*fx.context.dispatcher.snapshot(), BindingTable::defaults());
        assert!(!fx.context.store.as_ref().unwrap().path().exists());
    }

    #[tokio::test]
    async fn test_disk_requests_leave_runtime_responsive() {
        let fx = fixture(false);
        let copy = BindingRecord {
            name: "Copy".into(),
            key_combination: Some("ctrl+c".into()),
            ..Default::default()
        };

        // Another task gets to run on this single-threaded runtime meanwhile
        let ticker = tokio::spawn(async {});
        let response = ask(&fx.context, Request::SetBinding { slot: 7, binding: copy }).await;
        assert_eq!(response, Response::BindingUpdated { slot: 7 });
        assert!(ticker.is_finished());

        let saved = fx.context.store.as_ref().unwrap().load_bindings().unwrap().unwrap();
        assert_eq!(saved.get(Slot::new(7).unwrap()).unwrap().name(), "Copy");
    }

    #[tokio::test]
    async fn test_frames_are_length_prefixed() {
        let mut out = tokio_test::io::Builder::new()
            .write(&4u32.to_le_bytes())
            .write(b"ping")
            .build();
        write_frame(&mut out, b"ping").await.unwrap();

        let mut input = tokio_test::io::Builder::new()
            .read(&3u32.to_le_bytes())
            .read(b"abc")
            .build();
        assert_eq!(read_frame(&mut input).await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut input).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_invalid_data() {
        let mut input = tokio_test::io::Builder::new()
            .read(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .build();
        let err = read_frame(&mut input).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_roundtrip_and_subscription() {
        let fx = fixture(false);
        let socket = fx.dir.path().join("minpad.sock");
        let server = Arc::new(Server::bind(&socket, Arc::clone(&fx.context)).unwrap());
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        let mut client = tokio::net::UnixStream::connect(&socket).await.unwrap();

        async fn call(client: &mut tokio::net::UnixStream, json: &str) -> serde_json::Value {
            write_frame(client, json.as_bytes()).await.unwrap();
            let frame = read_frame(client).await.unwrap().unwrap();
            serde_json::from_slice(&frame).unwrap()
        }

        assert_eq!(call(&mut client, r#"{"type":"ping"}"#).await["type"], "pong");
        let reply = call(&mut client, r#"{"type":"launch_rockets"}"#).await;
        assert_eq!(reply["code"], "invalid_request");
        assert_eq!(call(&mut client, r#"{"type":"subscribe"}"#).await["type"], "subscribed");

        fx.context
            .events
            .send(ActionEvent::Unconfigured { slot: Slot::DECIMAL })
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut client))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let pushed: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(pushed["type"], "event");
        assert_eq!(pushed["event"]["slot"], 15);

        server.shutdown().await;
        assert!(!socket.exists());
        running.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let fx = fixture(false);
        let socket = fx.dir.path().join("big.sock");
        let server = Arc::new(Server::bind(&socket, Arc::clone(&fx.context)).unwrap());
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };

        let mut client = tokio::net::UnixStream::connect(&socket).await.unwrap();
        client
            .write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut client))
            .await
            .unwrap()
            .unwrap();
        assert!(closed.is_none());

        server.shutdown().await;
        running.abort();
    }
}
