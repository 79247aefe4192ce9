use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

use autocommit_core::{config, StateField, StateStore};
use autocommit_sync::{summarizer, GitCli, Orchestrator, PolicyInteraction};

use crate::engine::{Engine, EngineEvent, PendingReply};
use crate::error::{io_err, DaemonError};
use crate::paths::{autocommit_root, socket_path, ROTATION_CHECK_INTERVAL};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::watcher::RepoWatcher;

/// How the control loop answers a socket command.
pub(crate) enum Reply {
    Now(DaemonResponse),
    /// Resolved by a repository worker; the client task waits, the loop does not.
    Pending(PendingReply),
}

pub(crate) struct Command {
    request: DaemonRequest,
    respond_to: oneshot::Sender<Reply>,
}

/// Start the daemon and block the current thread until it exits.
///
/// All orchestration runs on one thread; `git` and HTTP calls run as child
/// processes or on the blocking pool.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    crate::logging::init(home)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon against the real `git` binary.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let global = config::load_at(&home)?;
    let state = StateStore::new(global.enabled);
    log_state_changes(&state);

    let interaction = Arc::new(PolicyInteraction::new(global.force_push_on_conflict));
    let orchestrator = Orchestrator::new(Arc::new(GitCli::new()), Arc::clone(&state), interaction)
        .with_template_override(summarizer::template_override_at(&home));

    let (events_tx, events_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let watcher = RepoWatcher::new(&autocommit_root(&home), events_tx.clone())?;
    let mut engine = Engine::new(home.clone(), global, Arc::new(orchestrator), events_tx)
        .with_watcher(watcher);
    engine.open_configured().await;

    serve(home, engine, events_rx).await
}

/// Drive `engine` until a `stop` command or a signal arrives.
pub async fn serve(
    home: PathBuf,
    engine: Engine,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
) -> Result<(), DaemonError> {
    let (command_tx, command_rx) = mpsc::channel::<Command>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let control_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = control_loop(engine, events_rx, command_rx, shutdown.clone(), shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = socket_server_task(home, command_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = wait_for_signal() => {
                    match signal {
                        Ok(name) => {
                            tracing::info!(signal = name, "shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("signal handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (control_result, socket_result, rotation_result, signal_result) =
        tokio::join!(control_handle, socket_handle, rotation_handle, signal_handle);

    handle_join("control_loop", control_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "ctrl-c"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Control loop
// ---------------------------------------------------------------------------

async fn control_loop(
    mut engine: Engine,
    mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    mut command_rx: mpsc::Receiver<Command>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                engine.handle_event(event).await;
            }
            command = command_rx.recv() => {
                let Some(command) = command else { break };
                let stop = command.request.cmd == "stop";
                let reply = dispatch(&mut engine, command.request).await;
                let _ = command.respond_to.send(reply);
                if stop {
                    let _ = shutdown_tx.send(());
                }
            }
            _ = sleep_until(deadline) => {
                engine.fire_due(Instant::now());
            }
        }
    }

    tracing::info!("stopping: closing repositories");
    engine.shutdown().await;
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Apply one socket request to the engine.
pub(crate) async fn dispatch(engine: &mut Engine, request: DaemonRequest) -> Reply {
    match execute(engine, request).await {
        Ok(reply) => reply,
        Err(err) => Reply::Now(DaemonResponse::error(err.to_string())),
    }
}

async fn execute(engine: &mut Engine, request: DaemonRequest) -> Result<Reply, DaemonError> {
    let now = |value: Value| -> Result<Reply, DaemonError> { Ok(Reply::Now(DaemonResponse::ok(value))) };
    match request.cmd.as_str() {
        "status" => now(engine.status()),
        "stop" => now(json!({ "stopping": true })),
        "enable" => {
            engine.enable(request.persist_for_branch)?;
            now(engine.status())
        }
        "disable" => {
            engine.disable(request.persist_for_branch)?;
            now(engine.status())
        }
        "open" => {
            let repo = engine.open(&required_repo(&request)?).await?;
            now(json!({ "repo": repo.0 }))
        }
        "close" => {
            engine.close(&required_repo(&request)?)?;
            now(json!({ "closed": true }))
        }
        "reload" => {
            engine.on_config_changed(None).await;
            now(engine.status())
        }
        "commit" => {
            let repo = required_repo(&request)?;
            Ok(Reply::Pending(engine.commit_now(&repo, request.message)?))
        }
        "squash" => {
            let repo = required_repo(&request)?;
            let count = request
                .count
                .ok_or_else(|| DaemonError::Protocol("squash requires 'count'".to_string()))?;
            Ok(Reply::Pending(engine.squash(&repo, count, request.message)?))
        }
        "undo" => {
            let repo = required_repo(&request)?;
            Ok(Reply::Pending(engine.undo(&repo, request.reference)?))
        }
        "restore" => {
            let repo = required_repo(&request)?;
            let (Some(reference), Some(path)) = (request.reference, request.path) else {
                return Err(DaemonError::Protocol(
                    "restore requires 'reference' and 'path'".to_string(),
                ));
            };
            Ok(Reply::Pending(engine.restore(&repo, reference, path)?))
        }
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn required_repo(request: &DaemonRequest) -> Result<PathBuf, DaemonError> {
    request
        .repo
        .clone()
        .ok_or_else(|| DaemonError::Protocol(format!("'{}' requires 'repo'", request.cmd)))
}

/// Log the state transitions an editor would show in its status bar.
fn log_state_changes(state: &Arc<StateStore>) {
    for field in [StateField::Enabled, StateField::Attached, StateField::Pulling, StateField::Pushing] {
        state.subscribe(field, move |change, snapshot| {
            let repo = change.repo.as_ref().and_then(|id| snapshot.repos.get(id).map(|r| (id, r)));
            match (field, repo) {
                (StateField::Enabled, _) => {
                    tracing::info!(enabled = snapshot.enabled, "auto-commit state");
                }
                (StateField::Attached, Some((id, activity))) => {
                    tracing::debug!(repo = %id, attached = activity.attached, "scheduler state");
                }
                (StateField::Pulling, Some((id, activity))) => {
                    tracing::info!(repo = %id, pulling = activity.pulling, "sync state");
                }
                (StateField::Pushing, Some((id, activity))) => {
                    tracing::info!(repo = %id, pushing = activity.pushing, "sync state");
                }
                _ => {}
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Socket server
// ---------------------------------------------------------------------------

async fn socket_server_task(
    home: PathBuf,
    command_tx: mpsc::Sender<Command>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = autocommit_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let command_tx = command_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, command_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    command_tx: mpsc::Sender<Command>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = submit_command(&command_tx, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn submit_command(command_tx: &mpsc::Sender<Command>, request: DaemonRequest) -> DaemonResponse {
    let (tx, rx) = oneshot::channel();
    if command_tx
        .send(Command {
            request,
            respond_to: tx,
        })
        .await
        .is_err()
    {
        return DaemonResponse::error(DaemonError::ChannelClosed("control loop").to_string());
    }
    match rx.await {
        Ok(Reply::Now(response)) => response,
        Ok(Reply::Pending(pending)) => match pending.await {
            Ok(result) => DaemonResponse::from_result(result),
            Err(_) => DaemonResponse::error(DaemonError::ChannelClosed("repository worker").to_string()),
        },
        Err(_) => DaemonResponse::error(DaemonError::ChannelClosed("control loop").to_string()),
    }
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick is immediate
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || crate::logging::rotate_logs(&home))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
