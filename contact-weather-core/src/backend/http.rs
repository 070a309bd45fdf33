use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    config::BackendConfig,
    error::{ErrorBody, ServiceError},
    model::{ChangeEvent, RecordId, RefreshRequest, Snapshot},
    service::{
        ChangeChannel, ErrorHandler, ErrorHandlerId, EventHandler, RefreshService,
        ReplayPosition, SnapshotFeed, SnapshotQuery, SubscriptionId,
    },
};

/// REST backend exposing the snapshot, refresh and change-event endpoints.
#[derive(Clone)]
pub struct HttpBackend {
    base_url: String,
    access_token: Option<String>,
    http: Client,
    streams: Arc<Mutex<HashMap<SubscriptionId, JoinHandle<()>>>>,
    error_handlers: Arc<Mutex<Vec<(ErrorHandlerId, ErrorHandler)>>>,
    next_id: Arc<AtomicU64>,
    debug: Arc<AtomicBool>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.access_token.is_some())
            .field("streams", &self.streams.lock().len())
            .field("error_handlers", &self.error_handlers.lock().len())
            .finish()
    }
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
            http: Client::new(),
            streams: Arc::default(),
            error_handlers: Arc::default(),
            next_id: Arc::default(),
            debug: Arc::default(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.base_url.clone(), config.access_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// One read of the latest snapshot; an empty or `null` body means no snapshot yet.
    pub async fn fetch_latest(&self, record_id: &RecordId) -> Result<Option<Snapshot>, ServiceError> {
        let res = self
            .authorize(self.http.get(self.url("snapshots/latest")))
            .query(&[("contactId", record_id.as_str())])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(remote_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str::<Option<Snapshot>>(&body).map_err(|e| {
            ServiceError::Decode(format!("{e} in snapshot body: {}", truncate_body(&body)))
        })
    }

    fn report(&self, err: &ServiceError) {
        let handlers: Vec<ErrorHandler> = self
            .error_handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        if handlers.is_empty() {
            warn!(error = %err, "unhandled change stream error");
        }
        for handler in handlers {
            handler(err);
        }
    }

    /// Reads the stream until it ends. Either way the subscription is then
    /// forgotten and the error handlers are told the stream is gone.
    async fn pump_events(self, id: SubscriptionId, mut res: Response, on_event: EventHandler) {
        let mut lines = LineSplitter::new(MAX_EVENT_LINE);
        let ended = loop {
            match res.chunk().await {
                Ok(Some(bytes)) => {
                    for line in lines.push(&bytes) {
                        self.dispatch(line, &on_event);
                    }
                }
                Ok(None) => {
                    if let Some(line) = lines.finish() {
                        self.dispatch(line, &on_event);
                    }
                    break ServiceError::Transport(format!("change stream {id} closed"));
                }
                Err(err) => break err.into(),
            }
        };

        debug!(subscription = %id, error = %ended, "change stream ended");
        self.streams.lock().remove(&id);
        self.report(&ended);
    }

    fn dispatch(&self, line: Line, on_event: &EventHandler) {
        match line {
            Line::Complete(bytes) => self.dispatch_line(&bytes, on_event),
            Line::Oversized => self.report(&ServiceError::Decode(format!(
                "change event longer than {MAX_EVENT_LINE} bytes"
            ))),
        }
    }

    fn dispatch_line(&self, line: &[u8], on_event: &EventHandler) {
        let line = line.trim_ascii();
        if line.is_empty() {
            return;
        }
        if self.debug.load(Ordering::Relaxed) {
            debug!(event = %String::from_utf8_lossy(line), "change stream line");
        }

        match serde_json::from_slice::<ChangeEvent>(line) {
            Ok(event) => on_event(event),
            Err(e) => self.report(&ServiceError::Decode(format!("change event: {e}"))),
        }
    }
}

impl SnapshotQuery for HttpBackend {
    // REST has no push; the feed resolves once and the next binding re-reads.
    fn watch(&self, record_id: &RecordId) -> SnapshotFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let record_id = record_id.clone();

        tokio::spawn(async move {
            let delivery = this.fetch_latest(&record_id).await;
            let _ = tx.send(delivery);
        });
        rx
    }
}

#[async_trait]
impl RefreshService for HttpBackend {
    async fn request_refresh(&self, request: &RefreshRequest) -> Result<(), ServiceError> {
        let res = self
            .authorize(self.http.post(self.url("snapshots/refresh")))
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        let body = res.text().await.unwrap_or_default();
        Err(remote_error(status, &body))
    }
}

#[async_trait]
impl ChangeChannel for HttpBackend {
    fn set_debug(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    fn on_error(&self, handler: ErrorHandler) -> ErrorHandlerId {
        let id = ErrorHandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.error_handlers.lock().push((id, handler));
        id
    }

    fn remove_error_handler(&self, id: ErrorHandlerId) {
        self.error_handlers.lock().retain(|(installed, _)| *installed != id);
    }

    async fn subscribe(
        &self,
        channel: &str,
        replay: ReplayPosition,
        on_event: EventHandler,
    ) -> Result<SubscriptionId, ServiceError> {
        let replay_id = replay.as_i64().to_string();
        let res = self
            .authorize(self.http.get(self.url("events")))
            .query(&[("channel", channel), ("replayId", replay_id.as_str())])
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(remote_error(status, &body));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        {
            // Held across the spawn so a stream that ends at once cannot remove itself first.
            let mut streams = self.streams.lock();
            let task = tokio::spawn(self.clone().pump_events(id, res, on_event));
            streams.insert(id, task);
        }
        debug!(channel, subscription = %id, "change stream open");
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(task) = self.streams.lock().remove(&id) {
            task.abort();
        }
    }
}

/// Builds a `Remote` error, accepting `{"message": ..}` or `[{"message": ..}, ..]` bodies.
fn remote_error(status: StatusCode, body: &str) -> ServiceError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok().or_else(|| {
        serde_json::from_str::<Vec<ErrorBody>>(body)
            .ok()
            .and_then(|list| list.into_iter().next())
    });

    ServiceError::Remote {
        status: Some(status.as_u16()),
        body: parsed,
    }
}

/// Longest change event line accepted from the stream.
const MAX_EVENT_LINE: usize = 256 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete(Vec<u8>),
    /// A line exceeded the cap and was dropped.
    Oversized,
}

/// Splits a byte stream into newline-terminated lines of at most `max` bytes.
#[derive(Debug)]
struct LineSplitter {
    buf: Vec<u8>,
    max: usize,
    skipping: bool,
}

impl LineSplitter {
    fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max,
            skipping: false,
        }
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<Line> {
        let mut out = Vec::new();
        for piece in bytes.split_inclusive(|b| *b == b'\n') {
            let ends_line = piece.last() == Some(&b'\n');
            if self.skipping {
                self.skipping = !ends_line;
                continue;
            }

            self.buf.extend_from_slice(piece);
            if self.buf.len() > self.max {
                self.buf.clear();
                self.skipping = !ends_line;
                out.push(Line::Oversized);
            } else if ends_line {
                out.push(Line::Complete(std::mem::take(&mut self.buf)));
            }
        }
        out
    }

    /// The unterminated tail, if any.
    fn finish(&mut self) -> Option<Line> {
        if self.skipping || self.buf.is_empty() {
            return None;
        }
        Some(Line::Complete(std::mem::take(&mut self.buf)))
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
