//! `kindle dev` command implementation.
//!
//! Unbundled development server with live updates.
//!
//! ## Architecture
//!
//! ```text
//! GET /                      → entry page + bootstrap <script> tags
//! GET /@bootstrap/*          → live-update client, refresh shim
//! GET /@modules/{specifier}  → resolve bare import → env substitution → bundle
//! GET /src/App.jsx (etc.)    → read → CommonJS rewrite → plugins → bare rewrite → lower
//! anything else              → <root>/public
//! ```
//!
//! Live updates use a WebSocket server on its own port. A background thread
//! watches the project and feeds every change to the [`LiveUpdateHub`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path as AxumPath, Request, State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::{any, get},
    Router,
};
use futures::{SinkExt, StreamExt};
use kindle_core::config::{load_config, DevConfig, DEFAULT_HOST};
use kindle_core::dev::transform::JS_CONTENT_TYPE;
use kindle_core::dev::{
    find_index_html, inject_bootstrap, live_update_client, ChangeKind, ClientEnv, LiveUpdateHub,
    ModuleServer, PassthroughToolchain, ServeError, WatchEvent, LIVE_UPDATE_ROUTE, REFRESH_SHIM,
    REFRESH_SHIM_ROUTE, SOURCE_EXTENSIONS,
};
use kindle_core::plugin::{Hook, PluginPipeline, PluginSettings};
use kindle_core::resolver::{MemoryResolveCache, Resolver, PACKAGES_DIR};
use miette::{IntoDiagnostic, Result};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::IntoFuture;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Project root.
    pub root: PathBuf,
    /// HTTP port (overrides config).
    pub port: Option<u16>,
    /// Live-update socket port (overrides config).
    pub live_port: Option<u16>,
    /// Host to bind to (overrides config).
    pub host: Option<String>,
    /// Explicit config file path (overrides auto-discovery).
    pub config: Option<PathBuf>,
    /// Mode; selects `.env.<mode>` files.
    pub mode: String,
}

/// Effective server settings: CLI flags over config file over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevSettings {
    pub host: String,
    pub port: u16,
    pub live_port: u16,
}

impl DevSettings {
    #[must_use]
    pub fn resolve(action: &DevAction, config: &DevConfig) -> Self {
        Self {
            host: action
                .host
                .clone()
                .unwrap_or_else(|| config.server.host.clone()),
            port: action.port.unwrap_or(config.server.port),
            live_port: action.live_port.unwrap_or(config.live_update.port),
        }
    }

    /// Address to bind: `localhost` binds the IPv4 loopback.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        if self.host == DEFAULT_HOST {
            "127.0.0.1"
        } else {
            &self.host
        }
    }
}

/// Shared server state. Read-only after startup apart from the hub's client set.
pub struct DevState {
    /// Project root (canonical).
    root: PathBuf,
    /// Entry module URL injected into the page.
    entry: String,
    /// Live-update socket port, baked into the client script.
    live_port: u16,
    /// Source and dependency serving.
    modules: ModuleServer,
    /// Connected live-update clients.
    hub: Arc<LiveUpdateHub>,
}

impl DevState {
    /// Build state for `root`: resolver (cached when configured), plugin
    /// pipeline from configured names, passthrough toolchain.
    pub fn new(
        root: PathBuf,
        config: &DevConfig,
        mode: &str,
        live_port: u16,
    ) -> std::result::Result<Self, kindle_core::Error> {
        let settings = PluginSettings {
            env: ClientEnv::load(&root, mode),
            define: config.define.clone(),
        };
        let plugins = PluginPipeline::from_names(&config.plugins, &settings)?;

        let resolver = if config.resolve_cache {
            Resolver::new(Arc::new(MemoryResolveCache::new()))
        } else {
            Resolver::default()
        };

        let modules = ModuleServer::new(
            root.clone(),
            resolver,
            plugins,
            Arc::new(PassthroughToolchain),
        );

        Ok(Self {
            hub: Arc::new(LiveUpdateHub::new(root.clone())),
            root,
            entry: config.entry.clone(),
            live_port,
            modules,
        })
    }

    #[must_use]
    pub fn hub(&self) -> Arc<LiveUpdateHub> {
        self.hub.clone()
    }
}

/// Run the dev server.
pub async fn run(action: DevAction) -> Result<()> {
    let root = dunce::canonicalize(&action.root).map_err(|_| {
        miette::miette!(
            "{}",
            kindle_core::Error::ProjectNotFound {
                path: action.root.clone()
            }
        )
    })?;

    let (config_path, config) = load_config(&root, action.config.as_deref()).into_diagnostic()?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded config");
    }

    let settings = DevSettings::resolve(&action, &config);
    let state = Arc::new(
        DevState::new(root.clone(), &config, &action.mode, settings.live_port)
            .into_diagnostic()?,
    );
    info!(plugins = ?state.modules.plugins(), mode = %action.mode, "plugin pipeline ready");

    let http = TcpListener::bind((settings.bind_host(), settings.port))
        .await
        .map_err(|e| miette::miette!("Failed to bind HTTP server on port {}: {}", settings.port, e))?;
    let live = TcpListener::bind((settings.bind_host(), settings.live_port))
        .await
        .map_err(|e| {
            miette::miette!(
                "Failed to bind live-update socket on port {}: {}",
                settings.live_port,
                e
            )
        })?;

    // File watcher runs on its own thread and feeds the hub
    let (event_tx, mut event_rx) = mpsc::channel::<WatchEvent>(64);
    let watch_root = root.clone();
    std::thread::spawn(move || {
        if let Err(e) = watch_files(&watch_root, &event_tx) {
            error!(error = %e, "file watcher stopped");
        }
    });

    let hub = state.hub();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            hub.handle_event(&event);
        }
    });

    info!(
        http = %format!("http://{}:{}", settings.host, settings.port),
        live_update = %format!("ws://{}:{}", settings.host, settings.live_port),
        root = %root.display(),
        "dev server running"
    );
    println!();
    println!("  Dev server running at http://{}:{}", settings.host, settings.port);
    println!("  Live updates on ws://{}:{}", settings.host, settings.live_port);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let app = app_router(state.clone());
    let sockets = live_update_router(state.hub());

    tokio::try_join!(
        axum::serve(http, app).into_future(),
        axum::serve(live, sockets).into_future()
    )
    .into_diagnostic()?;

    Ok(())
}

/// Routes of the HTTP server.
pub fn app_router(state: Arc<DevState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route(REFRESH_SHIM_ROUTE, get(serve_refresh_shim))
        .route(LIVE_UPDATE_ROUTE, get(serve_live_update_client))
        .route("/@modules/*specifier", any(serve_dependency))
        .fallback(serve_fallback)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Routes of the live-update socket server.
pub fn live_update_router(hub: Arc<LiveUpdateHub>) -> Router {
    Router::new()
        .route("/", get(live_update_socket))
        .with_state(hub)
}

// ============================================================================
// Route Handlers
// ============================================================================

fn javascript(code: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, JS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        code,
    )
        .into_response()
}

fn serve_error(err: &ServeError, body: String) -> Response {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, body).into_response()
}

/// Serve the entry page with bootstrap scripts.
async fn serve_index(State(state): State<Arc<DevState>>) -> Response {
    let Some(index) = find_index_html(&state.root) else {
        warn!(root = %state.root.display(), "no index.html found");
        return (
            StatusCode::NOT_FOUND,
            format!(
                "index.html not found in {} (checked index.html, public/, static/, app/ and subdirectories)",
                state.root.display()
            ),
        )
            .into_response();
    };

    let html = match tokio::fs::read_to_string(&index).await {
        Ok(html) => html,
        Err(e) => {
            error!(path = %index.display(), error = %e, "failed to read entry page");
            return (StatusCode::NOT_FOUND, format!("Failed to read {}", index.display()))
                .into_response();
        }
    };

    let html = inject_bootstrap(&html, &state.entry);
    let id = index.display().to_string();
    let html = match state
        .modules
        .plugins()
        .apply(Hook::TransformIndexHtml, &html, &id)
        .await
    {
        Ok(transformed) => transformed,
        Err(e) => {
            error!(error = %e, "entry page transform failed, serving untransformed page");
            html
        }
    };

    Html(html).into_response()
}

async fn serve_refresh_shim() -> Response {
    javascript(REFRESH_SHIM.to_string())
}

async fn serve_live_update_client(State(state): State<Arc<DevState>>) -> Response {
    javascript(live_update_client(state.live_port))
}

/// Serve a bare import at `/@modules/{specifier}`.
async fn serve_dependency(
    State(state): State<Arc<DevState>>,
    AxumPath(specifier): AxumPath<String>,
) -> Response {
    let specifier = specifier.trim_start_matches('/');
    match state.modules.serve_dependency(specifier).await {
        Ok(module) => javascript(module.code),
        Err(e) => serve_error(&e, format!("Module not found: {specifier}\n{e}")),
    }
}

/// Source files by extension; everything else from `<root>/public`.
async fn serve_fallback(State(state): State<Arc<DevState>>, uri: Uri, request: Request) -> Response {
    let path = uri.path();
    let is_source = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext));

    if is_source {
        return match state.modules.serve_source(path).await {
            Ok(module) => javascript(module.code),
            Err(e) => {
                debug!(path, error = %e, "source request failed");
                serve_error(&e, format!("File not found: {path}"))
            }
        };
    }

    let mut public = ServeDir::new(state.root.join("public"));
    match public.try_call(request).await {
        Ok(response) => response.map(axum::body::Body::new).into_response(),
        Err(e) => {
            warn!(path, error = %e, "static file error");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to serve {path}")).into_response()
        }
    }
}

// ============================================================================
// Live-update socket
// ============================================================================

async fn live_update_socket(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<LiveUpdateHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live_update_socket(socket, hub))
}

/// Forward hub messages to one client until either side closes.
async fn handle_live_update_socket(socket: WebSocket, hub: Arc<LiveUpdateHub>) {
    let (id, mut messages) = hub.register();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            message = messages.recv() => {
                let Some(message) = message else { break };
                if sender.send(Message::Text(message.to_json())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    // Client frames carry no meaning
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unregister(id);
}

// ============================================================================
// File Watching
// ============================================================================

/// Directories whose changes never reach clients.
const IGNORED_DIRS: &[&str] = &[PACKAGES_DIR, "dist"];

/// Check if a path should be ignored by the file watcher.
fn should_ignore(path: &Path, root: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

/// Watch the project and forward relevant changes. Blocks until the
/// receiving side goes away.
fn watch_files(root: &Path, events: &mpsc::Sender<WatchEvent>) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();

    let mut watcher = RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .into_diagnostic()?;

    for result in rx {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "watch error");
                continue;
            }
        };

        let Some(kind) = change_kind(&event.kind) else {
            continue;
        };

        for path in event.paths {
            if should_ignore(&path, root) {
                continue;
            }
            if events.blocking_send(WatchEvent::new(kind, path)).is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}
