//! Live-update coordination.
//!
//! Provides:
//! - Watch event classification into [`LiveUpdateMessage`]s
//! - [`LiveUpdateHub`], the connected-client registry and broadcaster
//! - The browser-side live-update client and refresh shim scripts

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Extensions whose changes can be hot-replaced by re-importing the module.
pub const CODE_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];

/// Outbound queue depth per connected client.
pub const CLIENT_QUEUE_CAPACITY: usize = 32;

/// Message pushed to live-update clients.
///
/// Serialized as `{"kind":"update","path":"/src/App.jsx"}` or
/// `{"kind":"reload"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LiveUpdateMessage {
    /// Re-import one module.
    Update { path: String },
    /// Full page reload.
    Reload,
}

impl LiveUpdateMessage {
    /// JSON text frame for the wire.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"kind":"reload"}"#.to_string())
    }
}

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// A filesystem change under the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: ChangeKind,
    /// Absolute path of the changed file.
    pub path: PathBuf,
}

impl WatchEvent {
    #[must_use]
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// `/`-prefixed, forward-slash path of `path` relative to `root`.
///
/// Paths outside the root are returned as given.
#[must_use]
pub fn project_relative_path(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let joined = rel
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

/// Classify a watch event: code files become targeted updates, everything
/// else forces a reload.
#[must_use]
pub fn classify(event: &WatchEvent, root: &Path) -> LiveUpdateMessage {
    let is_code = event
        .path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext));

    if is_code {
        LiveUpdateMessage::Update {
            path: project_relative_path(&event.path, root),
        }
    } else {
        LiveUpdateMessage::Reload
    }
}

/// Connected live-update clients.
///
/// Each client owns a bounded queue; the socket task drains it. Broadcast
/// never blocks: a client whose queue is full or closed misses the message.
#[derive(Debug)]
pub struct LiveUpdateHub {
    root: PathBuf,
    clients: Mutex<HashMap<usize, mpsc::Sender<LiveUpdateMessage>>>,
    next_id: Mutex<usize>,
}

impl LiveUpdateHub {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            clients: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Register a new client. Returns its id and the receiving end of its queue.
    pub fn register(&self) -> (usize, mpsc::Receiver<LiveUpdateMessage>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.clients.lock().insert(id, tx);
        info!(client = id, "live-update client connected");
        (id, rx)
    }

    /// Remove a client. Unknown ids are ignored.
    pub fn unregister(&self, id: usize) {
        if self.clients.lock().remove(&id).is_some() {
            info!(client = id, "live-update client disconnected");
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Send `message` to every client ready to receive it. Returns the
    /// number of clients it was delivered to.
    pub fn broadcast(&self, message: &LiveUpdateMessage) -> usize {
        let clients = self.clients.lock();
        let mut delivered = 0;

        for (id, tx) in clients.iter() {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(client = id, "client queue full, skipping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(client = id, "client gone, skipping");
                }
            }
        }

        delivered
    }

    /// Classify a watch event and broadcast the result.
    pub fn handle_event(&self, event: &WatchEvent) -> LiveUpdateMessage {
        let message = classify(event, &self.root);
        let path = project_relative_path(&event.path, &self.root);
        let delivered = self.broadcast(&message);
        info!(kind = event.kind.as_str(), path = %path, delivered, "file change");
        message
    }
}

/// Browser script that listens on the live-update socket.
#[must_use]
pub fn live_update_client(port: u16) -> String {
    LIVE_UPDATE_CLIENT.replace("__LIVE_UPDATE_PORT__", &port.to_string())
}

/// Browser script defining the registration globals refresh-aware modules expect.
pub const REFRESH_SHIM: &str = r"window.$RefreshReg$ = () => {};
window.$RefreshSig$ = () => (type) => type;
";

const LIVE_UPDATE_CLIENT: &str = r"// kindle live-update client
(() => {
  const socket = new WebSocket('ws://' + location.hostname + ':__LIVE_UPDATE_PORT__');

  socket.addEventListener('message', async (event) => {
    let data;
    try {
      data = JSON.parse(event.data);
    } catch {
      return;
    }

    if (data.kind === 'reload') {
      location.reload();
    } else if (data.kind === 'update') {
      try {
        await import(data.path + '?t=' + Date.now());
      } finally {
        location.reload();
      }
    }
  });

  socket.addEventListener('close', () => {
    console.log('[kindle] live-update connection closed');
  });
})();
";
