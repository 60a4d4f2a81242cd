//! Per-database daemon.
//!
//! One daemon per database, listening on a Unix-domain socket inside the
//! `.beads/` directory. It serializes mutating RPCs through the store's
//! single-writer transaction, answers reads under short transactions, and
//! streams a mutation feed to subscribers. A registry entry
//! (`.beads/daemon.json`) records the running instance; sockets that refuse
//! connections are treated as stale and recreated. The daemon exits on an
//! idle timeout (default 10 minutes) or on a `stop` request.
//!
//! Every mutating RPC is one store transaction: fully applied or not
//! applied. The daemon never retries mutations on the client's behalf.

pub mod protocol;

use chrono::Utc;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Workspace;
use crate::error::Result;
use protocol::DaemonInfo;

/// Default idle shutdown.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Registry filename inside `.beads/`.
pub const REGISTRY_FILENAME: &str = "daemon.json";

/// Write the registry entry for a running daemon.
///
/// # Errors
///
/// `Io`/`Json` on write failures.
pub fn write_registry(beads_dir: &Path, socket: &Path, db_path: &Path) -> Result<()> {
    let info = DaemonInfo {
        pid: std::process::id(),
        socket: socket.display().to_string(),
        db_path: db_path.display().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: Utc::now(),
    };
    let path = beads_dir.join(REGISTRY_FILENAME);
    fs::write(path, serde_json::to_string_pretty(&info)? + "\n")?;
    Ok(())
}

/// Read the registry entry, if any.
///
/// # Errors
///
/// `Io`/`Json` when the file exists but cannot be read or parsed.
pub fn read_registry(beads_dir: &Path) -> Result<Option<DaemonInfo>> {
    let path = beads_dir.join(REGISTRY_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
}

fn remove_registry(beads_dir: &Path) {
    let _ = fs::remove_file(beads_dir.join(REGISTRY_FILENAME));
}

/// Run the daemon loop for this workspace.
///
/// # Errors
///
/// `DaemonUnavailable` when another daemon owns the socket; a platform
/// without Unix sockets refuses with `Config`.
pub fn run(workspace: &Workspace, idle_timeout: Duration) -> Result<()> {
    #[cfg(unix)]
    {
        unix_server::serve(workspace, idle_timeout)
    }
    #[cfg(not(unix))]
    {
        let _ = (workspace, idle_timeout);
        Err(crate::error::BeadsError::Config(
            "the daemon requires Unix-domain sockets on this platform".to_string(),
        ))
    }
}

#[cfg(unix)]
pub use unix_server::{DaemonClient, is_responsive, stop};

/// Start a detached daemon for this workspace when none is responsive.
/// This is the on-demand path clients take when the socket is dead.
/// Returns false when a live daemon already answers or the workspace
/// opted out of the daemon.
///
/// # Errors
///
/// `Io` on spawn failures.
pub fn ensure_running(workspace: &Workspace) -> Result<bool> {
    #[cfg(unix)]
    {
        if workspace.no_daemon {
            return Ok(false);
        }
        if unix_server::is_responsive(&workspace.socket_path()) {
            return Ok(false);
        }
        let exe = std::env::current_exe()?;
        std::process::Command::new(exe)
            .args(["daemon", "run"])
            .current_dir(&workspace.root)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        tracing::info!("spawned detached daemon");
        Ok(true)
    }
    #[cfg(not(unix))]
    {
        let _ = workspace;
        Ok(false)
    }
}

#[cfg(unix)]
mod unix_server {
    use chrono::Utc;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::{remove_registry, write_registry};
    use crate::config::Workspace;
    use crate::daemon::protocol::{MutationEvent, MutationKind, Request, Response};
    use crate::error::{BeadsError, Result};
    use crate::model::{Issue, Priority};
    use crate::storage::{IssueUpdate, ListFilters, SqliteStorage};
    use crate::util::id::IdGenerator;

    struct ServerState {
        storage: Mutex<SqliteStorage>,
        subscribers: Mutex<Vec<UnixStream>>,
        last_activity: Mutex<Instant>,
        last_error: Mutex<Option<String>>,
        feed_seq: AtomicU64,
        shutdown: AtomicBool,
        default_prefix: String,
    }

    /// Serve the daemon loop until idle timeout or a `stop` request.
    ///
    /// # Errors
    ///
    /// `DaemonUnavailable` when another live daemon already owns the socket;
    /// `Io` on bind failures.
    pub fn serve(workspace: &Workspace, idle_timeout: Duration) -> Result<()> {
        let socket_path = workspace.socket_path();
        reclaim_socket(&socket_path)?;

        let storage = workspace.open_storage()?;
        let default_prefix = storage
            .get_config(crate::config::CONFIG_ISSUE_PREFIX)?
            .unwrap_or_else(|| "bd".to_string());

        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        write_registry(&workspace.beads_dir, &socket_path, &workspace.db_path)?;
        tracing::info!(socket = %socket_path.display(), "daemon listening");

        let state = Arc::new(ServerState {
            storage: Mutex::new(storage),
            subscribers: Mutex::new(Vec::new()),
            last_activity: Mutex::new(Instant::now()),
            last_error: Mutex::new(None),
            feed_seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            default_prefix,
        });

        loop {
            if state.shutdown.load(Ordering::SeqCst) {
                tracing::info!("daemon stopping on request");
                break;
            }
            let idle = state
                .last_activity
                .lock()
                .map(|t| t.elapsed())
                .unwrap_or_default();
            if idle > idle_timeout {
                tracing::info!(idle_secs = idle.as_secs(), "daemon idle timeout");
                break;
            }

            match listener.accept() {
                Ok((stream, _)) => {
                    let state = Arc::clone(&state);
                    std::thread::spawn(move || handle_connection(stream, &state));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        let _ = std::fs::remove_file(&socket_path);
        remove_registry(&workspace.beads_dir);
        Ok(())
    }

    /// A socket file nobody answers on is stale: remove it. A live one
    /// means another daemon owns this database.
    fn reclaim_socket(socket_path: &Path) -> Result<()> {
        if !socket_path.exists() {
            return Ok(());
        }
        match UnixStream::connect(socket_path) {
            Ok(_) => Err(BeadsError::DaemonUnavailable {
                path: socket_path.to_path_buf(),
            }),
            Err(_) => {
                tracing::warn!(socket = %socket_path.display(), "removing stale socket");
                std::fs::remove_file(socket_path)?;
                Ok(())
            }
        }
    }

    fn handle_connection(stream: UnixStream, state: &Arc<ServerState>) {
        let Ok(read_half) = stream.try_clone() else {
            return;
        };
        let mut writer = stream;
        let reader = BufReader::new(read_half);

        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(mut t) = state.last_activity.lock() {
                *t = Instant::now();
            }

            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let resp = Response::Error {
                        code: "BAD_REQUEST".to_string(),
                        message: format!("unparseable request: {e}"),
                        hint: None,
                    };
                    if write_line(&mut writer, &resp).is_err() {
                        break;
                    }
                    continue;
                }
            };

            if request == Request::Subscribe {
                if let Ok(clone) = writer.try_clone() {
                    if let Ok(mut subs) = state.subscribers.lock() {
                        subs.push(clone);
                    }
                }
                let _ = write_line(&mut writer, &Response::ok_empty());
                continue;
            }
            if request == Request::Stop {
                state.shutdown.store(true, Ordering::SeqCst);
                let _ = write_line(&mut writer, &Response::ok_empty());
                break;
            }

            let response = dispatch(&request, state);
            if let Response::Error { message, .. } = &response {
                if let Ok(mut last) = state.last_error.lock() {
                    *last = Some(message.clone());
                }
            }
            if write_line(&mut writer, &response).is_err() {
                break;
            }
        }
    }

    fn write_line(stream: &mut UnixStream, response: &Response) -> std::io::Result<()> {
        let mut line = serde_json::to_string(response).unwrap_or_else(|_| {
            "{\"status\":\"error\",\"code\":\"INTERNAL_ERROR\",\"message\":\"serialize\"}"
                .to_string()
        });
        line.push('\n');
        stream.write_all(line.as_bytes())
    }

    fn broadcast(state: &ServerState, kind: MutationKind, issue_id: &str) {
        let event = MutationEvent {
            id: state.feed_seq.fetch_add(1, Ordering::SeqCst),
            kind,
            issue_id: issue_id.to_string(),
            timestamp: Utc::now(),
        };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        let line = format!("{line}\n");
        if let Ok(mut subs) = state.subscribers.lock() {
            subs.retain_mut(|sub| sub.write_all(line.as_bytes()).is_ok());
        }
    }

    fn dispatch(request: &Request, state: &Arc<ServerState>) -> Response {
        match handle(request, state) {
            Ok(response) => response,
            Err(e) => Response::from_error(&e),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle(request: &Request, state: &Arc<ServerState>) -> Result<Response> {
        let mut storage = state
            .storage
            .lock()
            .map_err(|_| BeadsError::Config("daemon state poisoned".to_string()))?;

        match request {
            Request::Health => {
                let last_error = state.last_error.lock().ok().and_then(|last| last.clone());
                Ok(Response::ok(serde_json::json!({
                    "version": env!("CARGO_PKG_VERSION"),
                    "status": "ok",
                    "last_error": last_error,
                })))
            }

            Request::Show { id } => {
                let issue = storage
                    .get_issue(id)?
                    .ok_or_else(|| BeadsError::IssueNotFound { id: id.clone() })?;
                Ok(Response::ok(serde_json::to_value(issue)?))
            }

            Request::List { status } => {
                let filters = ListFilters {
                    status: match status {
                        Some(raw) => Some(raw.parse()?),
                        None => None,
                    },
                    ..Default::default()
                };
                Ok(Response::ok(serde_json::to_value(
                    storage.list_issues(&filters)?,
                )?))
            }

            Request::Ready { limit } => Ok(Response::ok(serde_json::to_value(
                storage.get_ready_issues(*limit)?,
            )?)),

            Request::Stats => {
                let all = storage.list_issues(&ListFilters::default())?;
                let mut by_status: std::collections::BTreeMap<String, usize> =
                    std::collections::BTreeMap::new();
                for issue in &all {
                    *by_status
                        .entry(issue.status.as_str().to_string())
                        .or_default() += 1;
                }
                Ok(Response::ok(serde_json::json!({
                    "total": all.len(),
                    "by_status": by_status,
                })))
            }

            Request::Create {
                title,
                description,
                priority,
                issue_type,
                assignee,
                actor,
            } => {
                let now = Utc::now();
                let generator = IdGenerator::with_prefix(state.default_prefix.clone());
                let count = storage.count_issues()?;
                let id = generator.generate(
                    title,
                    description.as_deref(),
                    actor.as_deref(),
                    now,
                    count,
                    |candidate| storage.id_exists(candidate).unwrap_or(true),
                )?;
                let mut issue = Issue::new(id.clone(), title.clone(), now);
                issue.description.clone_from(description);
                issue.assignee.clone_from(assignee);
                issue.created_by.clone_from(actor);
                if let Some(p) = priority {
                    issue.priority = Priority(*p);
                }
                if let Some(t) = issue_type {
                    issue.issue_type = t.parse()?;
                }
                crate::validation::require_valid(&issue)?;
                storage.create_issue(&issue)?;
                drop(storage);
                broadcast(state, MutationKind::Create, &id);
                Ok(Response::ok(serde_json::json!({"id": id})))
            }

            Request::Update {
                id,
                title,
                status,
                priority,
                assignee,
            } => {
                let update = IssueUpdate {
                    title: title.clone(),
                    status: match status {
                        Some(raw) => Some(raw.parse()?),
                        None => None,
                    },
                    priority: priority.map(Priority),
                    assignee: assignee.clone().map(Some),
                    ..Default::default()
                };
                let issue = storage.update_issue(id, &update)?;
                drop(storage);
                broadcast(state, MutationKind::Update, &issue.id);
                Ok(Response::ok(serde_json::to_value(issue)?))
            }

            Request::Close { id } => {
                let issue = storage.close_issue(id)?;
                drop(storage);
                broadcast(state, MutationKind::Close, &issue.id);
                Ok(Response::ok(serde_json::to_value(issue)?))
            }

            Request::Delete { id, reason } => {
                let issue = storage.delete_issue(id, None, reason.as_deref())?;
                drop(storage);
                broadcast(state, MutationKind::Delete, &issue.id);
                Ok(Response::ok(serde_json::json!({"id": issue.id})))
            }

            // Handled in the connection loop.
            Request::Subscribe | Request::Stop => Ok(Response::ok_empty()),
        }
    }

    /// Minimal blocking client for the daemon socket.
    pub struct DaemonClient {
        stream: UnixStream,
    }

    impl DaemonClient {
        /// Connect to a daemon socket.
        ///
        /// # Errors
        ///
        /// `DaemonUnavailable` when nothing answers.
        pub fn connect(socket_path: &Path) -> Result<Self> {
            let stream =
                UnixStream::connect(socket_path).map_err(|_| BeadsError::DaemonUnavailable {
                    path: socket_path.to_path_buf(),
                })?;
            stream.set_read_timeout(Some(Duration::from_secs(30)))?;
            Ok(Self { stream })
        }

        /// Send one request and read one response line.
        ///
        /// # Errors
        ///
        /// `Io`/`Json` on transport failures.
        pub fn request(&mut self, request: &Request) -> Result<Response> {
            let mut line = serde_json::to_string(request)?;
            line.push('\n');
            self.stream.write_all(line.as_bytes())?;
            let raw = self.read_line()?;
            Ok(serde_json::from_str(raw.trim())?)
        }

        /// Read one raw line from the connection (mutation feed events).
        ///
        /// # Errors
        ///
        /// `Io` on transport failures.
        pub fn read_line(&mut self) -> Result<String> {
            let mut reader = BufReader::new(self.stream.try_clone()?);
            let mut line = String::new();
            reader.read_line(&mut line)?;
            Ok(line)
        }
    }

    /// Ask a running daemon to stop; false when no daemon answered.
    ///
    /// # Errors
    ///
    /// `Io`/`Json` on transport failures after a successful connect.
    pub fn stop(socket_path: &Path) -> Result<bool> {
        match DaemonClient::connect(socket_path) {
            Ok(mut client) => {
                client.request(&Request::Stop)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// True when a daemon answers on the socket.
    #[must_use]
    pub fn is_responsive(socket_path: &Path) -> bool {
        DaemonClient::connect(socket_path)
            .and_then(|mut c| c.request(&Request::Health))
            .is_ok()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::protocol::{MutationEvent, MutationKind, Request, Response};
    use super::*;
    use crate::config::init_workspace;
    use crate::error::BeadsError;
    use std::thread;
    use tempfile::TempDir;

    fn start_daemon(td: &TempDir) -> (Workspace, thread::JoinHandle<Result<()>>) {
        let workspace = init_workspace(td.path(), "bd", false).unwrap();
        let ws = workspace.clone();
        let handle = thread::spawn(move || run(&ws, Duration::from_secs(30)));
        let socket = workspace.socket_path();
        for _ in 0..100 {
            if socket.exists() && is_responsive(&socket) {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        (workspace, handle)
    }

    #[test]
    fn health_create_show_stop() {
        let td = TempDir::new().unwrap();
        let (workspace, handle) = start_daemon(&td);
        let socket = workspace.socket_path();

        let mut client = DaemonClient::connect(&socket).unwrap();
        let health = client.request(&Request::Health).unwrap();
        let Response::Ok { data: Some(data) } = health else {
            panic!("health failed");
        };
        assert_eq!(data["status"], "ok");

        let created = client
            .request(&Request::Create {
                title: "Daemon issue".to_string(),
                description: None,
                priority: Some(1),
                issue_type: Some("bug".to_string()),
                assignee: None,
                actor: Some("alice".to_string()),
            })
            .unwrap();
        let Response::Ok { data: Some(data) } = created else {
            panic!("create failed");
        };
        let id = data["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("bd-"));

        let shown = client.request(&Request::Show { id: id.clone() }).unwrap();
        let Response::Ok { data: Some(data) } = shown else {
            panic!("show failed");
        };
        assert_eq!(data["title"], "Daemon issue");

        assert!(read_registry(&workspace.beads_dir).unwrap().is_some());

        assert!(stop(&socket).unwrap());
        handle.join().unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn mutation_feed_reaches_subscribers() {
        let td = TempDir::new().unwrap();
        let (workspace, handle) = start_daemon(&td);
        let socket = workspace.socket_path();

        let mut sub = DaemonClient::connect(&socket).unwrap();
        let ack = sub.request(&Request::Subscribe).unwrap();
        assert!(matches!(ack, Response::Ok { .. }));

        let mut client = DaemonClient::connect(&socket).unwrap();
        client
            .request(&Request::Create {
                title: "Feed me".to_string(),
                description: None,
                priority: None,
                issue_type: None,
                assignee: None,
                actor: None,
            })
            .unwrap();

        let line = sub.read_line().unwrap();
        let event: MutationEvent = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event.kind, MutationKind::Create);
        assert!(event.issue_id.starts_with("bd-"));

        stop(&socket).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn stale_socket_is_reclaimed() {
        let td = TempDir::new().unwrap();
        let workspace = init_workspace(td.path(), "bd", false).unwrap();
        std::fs::write(workspace.socket_path(), "").unwrap();

        let ws = workspace.clone();
        let handle = thread::spawn(move || run(&ws, Duration::from_secs(30)));
        let socket = workspace.socket_path();
        for _ in 0..100 {
            if is_responsive(&socket) {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(is_responsive(&socket));
        stop(&socket).unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn second_daemon_refuses_live_socket() {
        let td = TempDir::new().unwrap();
        let (workspace, handle) = start_daemon(&td);

        let err = run(&workspace, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, BeadsError::DaemonUnavailable { .. }));

        stop(&workspace.socket_path()).unwrap();
        handle.join().unwrap().unwrap();
    }
}
