//! Host capabilities the component engine consumes: a single-threaded event loop, a network
//! fetch, and a document that accepts injected `<head>`/`<body>` resources and receives bubbled
//! lifecycle notifications.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::element::{Event, Listener};
use crate::error::{ComponentError, FetchError, ResourceLoadError, Result};
use crate::script::value;

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOOP
// ═══════════════════════════════════════════════════════════════════════════════

/// Cooperative single-threaded task queue. Everything deferred (resource loading, async type
/// parses, attribute-mutation delivery, imports) is spawned here and only makes progress while
/// the embedder drives the loop.
pub struct EventLoop {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl Default for EventLoop {
    fn default() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").finish_non_exhaustive()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) -> Result<()> {
        self.spawner.spawn_local(task).map_err(|_| ComponentError::Spawn)
    }

    /// Run every task until none can make progress. Re-entrant calls from inside a task are
    /// ignored and return `false`.
    pub fn run_until_stalled(&self) -> bool {
        match self.pool.try_borrow_mut() {
            Ok(mut pool) => {
                pool.run_until_stalled();
                true
            }
            Err(_) => {
                trace!("run_until_stalled called from inside the event loop");
                false
            }
        }
    }

    /// Run until every spawned task has completed. Tasks waiting on something the loop itself
    /// cannot provide keep this blocked; prefer `run_until_stalled` in that case.
    pub fn run(&self) -> bool {
        match self.pool.try_borrow_mut() {
            Ok(mut pool) => {
                pool.run();
                true
            }
            Err(_) => false,
        }
    }

    /// Drive the loop until `fut` completes. Returns `None` when called re-entrantly.
    pub fn block_on<T>(&self, fut: impl Future<Output = T>) -> Option<T> {
        let mut pool = self.pool.try_borrow_mut().ok()?;
        Some(pool.run_until(fut))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FETCH
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub url: String,
    pub status: u16,
    pub text: String,
}

impl Response {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self) -> Result<Self, FetchError> {
        if self.ok() {
            Ok(self)
        } else {
            Err(FetchError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    pub fn json(&self) -> Result<Value, FetchError> {
        serde_json::from_str(&self.text).map_err(|e| FetchError::Body {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }

    /// Response metadata together with the body text.
    pub fn to_value(&self) -> Value {
        value::object([
            ("url".to_string(), Value::String(self.url.clone())),
            ("status".to_string(), Value::from(self.status)),
            ("ok".to_string(), Value::Bool(self.ok())),
            ("text".to_string(), Value::String(self.text.clone())),
        ])
    }
}

pub trait Fetch {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Response, FetchError>>;
}

/// In-memory routes. Unknown addresses answer 404.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    routes: RefCell<HashMap<String, (u16, String)>>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: impl Into<String>, text: impl Into<String>) -> &Self {
        self.route_status(url, 200, text)
    }

    pub fn route_status(&self, url: impl Into<String>, status: u16, text: impl Into<String>) -> &Self {
        self.routes.borrow_mut().insert(url.into(), (status, text.into()));
        self
    }

    /// Every address fetched so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Response, FetchError>> {
        self.requests.borrow_mut().push(url.to_string());
        let (status, text) = self
            .routes
            .borrow()
            .get(url)
            .cloned()
            .unwrap_or_else(|| (404, String::new()));
        future::ready(Ok(Response {
            url: url.to_string(),
            status,
            text,
        }))
        .boxed_local()
    }
}

/// Reads `file:` addresses (absolute, or relative to `base`) from disk.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base: Url,
}

impl FileFetcher {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// Resolve relative addresses against a directory.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };
        let base = Url::from_directory_path(&dir)
            .map_err(|_| ComponentError::Config(format!("not a directory path: {}", dir.display())))?;
        Ok(Self { base })
    }

    pub fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        self.base.join(url).map_err(|e| FetchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Fetch for FileFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Response, FetchError>> {
        let result = self.resolve(url).and_then(|resolved| {
            if resolved.scheme() != "file" {
                return Err(FetchError::Network {
                    url: resolved.to_string(),
                    reason: format!("unsupported scheme {:?}", resolved.scheme()),
                });
            }
            let path = resolved.to_file_path().map_err(|_| FetchError::Network {
                url: resolved.to_string(),
                reason: "not a local path".to_string(),
            })?;
            debug!(path = %path.display(), "reading file");
            match std::fs::read_to_string(&path) {
                Ok(text) => Ok(Response {
                    url: resolved.to_string(),
                    status: 200,
                    text,
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Response {
                    url: resolved.to_string(),
                    status: 404,
                    text: String::new(),
                }),
                Err(e) => Err(FetchError::Network {
                    url: resolved.to_string(),
                    reason: e.to_string(),
                }),
            }
        });
        future::ready(result).boxed_local()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOCUMENT RESOURCES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Head,
    Body,
}

/// A `<style>`, `<link>` or `<script>` lifted out of a component template.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
}

impl Resource {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn src(&self) -> Option<&str> {
        match self.tag.as_str() {
            "link" => self.attribute("href"),
            _ => self.attribute("src"),
        }
    }

    /// External scripts gate every later script in source order.
    pub fn is_external_script(&self) -> bool {
        self.tag == "script" && self.attribute("src").is_some()
    }
}

/// Appends a resource to the document and completes when it has loaded (or failed to).
pub trait ResourceLoader {
    fn inject(&self, target: Target, resource: &Resource) -> LocalBoxFuture<'static, Result<(), ResourceLoadError>>;
}

#[derive(Default)]
struct DocumentState {
    head: RefCell<Vec<Resource>>,
    body: RefCell<Vec<Resource>>,
    listeners: RefCell<Vec<(String, Listener)>>,
    dispatched: Cell<usize>,
}

/// The per-realm document: injected resources plus document-level listeners that receive
/// bubbled lifecycle events.
#[derive(Clone, Default)]
pub struct Document {
    state: Rc<DocumentState>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("head", &self.state.head.borrow().len())
            .field("body", &self.state.body.borrow().len())
            .finish()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, target: Target, resource: Resource) {
        match target {
            Target::Head => self.state.head.borrow_mut().push(resource),
            Target::Body => self.state.body.borrow_mut().push(resource),
        }
    }

    pub fn head(&self) -> Vec<Resource> {
        self.state.head.borrow().clone()
    }

    pub fn body(&self) -> Vec<Resource> {
        self.state.body.borrow().clone()
    }

    pub fn add_event_listener(&self, kind: impl Into<String>, listener: impl Fn(&Event) + 'static) {
        self.state
            .listeners
            .borrow_mut()
            .push((kind.into(), Rc::new(listener)));
    }

    /// Deliver a bubbled event to document-level listeners.
    pub(crate) fn receive(&self, event: &Event) {
        self.state.dispatched.set(self.state.dispatched.get() + 1);
        let listeners: Vec<Listener> = self
            .state
            .listeners
            .borrow()
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of bubbled events seen.
    pub fn dispatched(&self) -> usize {
        self.state.dispatched.get()
    }
}

/// Records resources in the realm's [`Document`]. External sources are fetched when a fetcher
/// is attached, so a broken address surfaces as a [`ResourceLoadError`].
#[derive(Clone)]
pub struct DocumentLoader {
    document: Document,
    fetcher: Option<Rc<dyn Fetch>>,
}

impl DocumentLoader {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Rc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }
}

impl ResourceLoader for DocumentLoader {
    fn inject(&self, target: Target, resource: &Resource) -> LocalBoxFuture<'static, Result<(), ResourceLoadError>> {
        self.document.append(target, resource.clone());
        let (Some(fetcher), Some(src)) = (self.fetcher.clone(), resource.src().map(str::to_string)) else {
            return future::ready(Ok(())).boxed_local();
        };
        async move {
            let response = fetcher.fetch(&src).await.map_err(|e| ResourceLoadError {
                url: src.clone(),
                reason: e.to_string(),
            })?;
            response.error_for_status().map_err(|e| ResourceLoadError {
                url: src.clone(),
                reason: e.to_string(),
            })?;
            Ok(())
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_memory_fetcher_routes() {
        let fetcher = MemoryFetcher::new();
        fetcher.route("a.json", "[1]").route_status("gone", 410, "");
        let event_loop = EventLoop::new();
        let ok = event_loop.block_on(fetcher.fetch("a.json")).unwrap().unwrap();
        assert!(ok.ok());
        assert_eq!(ok.json().unwrap(), serde_json::json!([1]));
        let gone = event_loop.block_on(fetcher.fetch("gone")).unwrap().unwrap();
        assert!(matches!(gone.error_for_status(), Err(FetchError::Status { status: 410, .. })));
        assert_eq!(fetcher.requests(), vec!["a.json", "gone"]);
    }

    #[test]
    fn test_response_value_shape() {
        let response = Response {
            url: "x".into(),
            status: 200,
            text: "hi".into(),
        };
        assert_eq!(
            response.to_value(),
            serde_json::json!({"url": "x", "status": 200, "ok": true, "text": "hi"})
        );
    }

    #[test]
    fn test_event_loop_runs_spawned_tasks() {
        let event_loop = EventLoop::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        event_loop.spawn(async move { s.borrow_mut().push(1) }).unwrap();
        assert!(seen.borrow().is_empty());
        event_loop.run_until_stalled();
        assert_eq!(*seen.borrow(), vec![1]);

        let s = seen.clone();
        event_loop.spawn(async move { s.borrow_mut().push(2) }).unwrap();
        assert!(event_loop.run());
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_document_loader_reports_missing_script() {
        let document = Document::new();
        let fetcher = Rc::new(MemoryFetcher::new());
        let loader = DocumentLoader::new(document.clone()).with_fetcher(fetcher);
        let script = Resource {
            tag: "script".into(),
            attributes: vec![("src".into(), "missing.js".into())],
            text: String::new(),
        };
        let event_loop = EventLoop::new();
        let result = event_loop.block_on(loader.inject(Target::Body, &script)).unwrap();
        assert!(result.is_err());
        assert_eq!(document.body().len(), 1);
        assert!(script.is_external_script());
    }

    #[test]
    fn test_file_fetcher_reads_relative_paths() {
        let dir = std::env::temp_dir().join(format!("uifactory-fetch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x.html"), "<p>x</p>").unwrap();
        let fetcher = FileFetcher::from_dir(&dir).unwrap();
        let event_loop = EventLoop::new();
        let response = event_loop.block_on(fetcher.fetch("x.html")).unwrap().unwrap();
        assert_eq!(response.text, "<p>x</p>");
        let missing = event_loop.block_on(fetcher.fetch("nope.html")).unwrap().unwrap();
        assert_eq!(missing.status, 404);
        std::fs::remove_dir_all(&dir).ok();
    }
}
