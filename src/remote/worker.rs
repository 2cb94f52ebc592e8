use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use log::{error, info};

use super::{BackendClient, CompareRequest, Comparison, DiscreteAnalysis, MigrationMatrix, RemoteError};
use crate::tree::TreePayload;

/// Work handed to the background thread.
#[derive(Debug, Clone)]
pub enum RemoteRequest {
    FetchTree { filename: Option<String> },
    /// Upload a file, then fetch the tree the backend stored.
    Upload { path: PathBuf },
    Discrete {
        filename: Option<String>,
        top_k: Option<u32>,
        support_file: Option<PathBuf>,
    },
    Matrix { filename: Option<String> },
    Compare(CompareRequest),
}

impl RemoteRequest {
    pub fn describe(&self) -> &'static str {
        match self {
            RemoteRequest::FetchTree { .. } => "Fetching tree",
            RemoteRequest::Upload { .. } => "Uploading tree",
            RemoteRequest::Discrete { .. } => "Running discrete analysis",
            RemoteRequest::Matrix { .. } => "Loading migration matrix",
            RemoteRequest::Compare(_) => "Comparing trees",
        }
    }
}

#[derive(Debug)]
pub enum RemoteResponse {
    Tree {
        filename: Option<String>,
        result: Result<TreePayload, RemoteError>,
    },
    Uploaded {
        stored: Result<String, RemoteError>,
        tree: Option<Result<TreePayload, RemoteError>>,
    },
    Discrete(Result<DiscreteAnalysis, RemoteError>),
    Matrix(Result<MigrationMatrix, RemoteError>),
    Compared(Result<Comparison, RemoteError>),
}

/// Runs backend calls on short-lived threads and hands results back through a
/// channel the UI drains once per frame.
pub struct RemoteWorker {
    client: BackendClient,
    tx: Sender<RemoteResponse>,
    rx: Receiver<RemoteResponse>,
    pending: usize,
    wake: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl RemoteWorker {
    pub fn new(client: BackendClient) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            client,
            tx,
            rx,
            pending: 0,
            wake: None,
        }
    }

    /// Called from the worker thread after each response is queued.
    pub fn with_wake(mut self, wake: impl Fn() + Send + Sync + 'static) -> Self {
        self.wake = Some(Arc::new(wake));
        self
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_busy(&self) -> bool {
        self.pending > 0
    }

    pub fn submit(&mut self, request: RemoteRequest) {
        info!("{} via {}", request.describe(), self.client.base_url());
        let client = self.client.clone();
        let tx = self.tx.clone();
        let waker = self.wake.clone();
        self.pending += 1;
        thread::spawn(move || {
            let response = execute(&client, request);
            let _ = tx.send(response);
            if let Some(waker) = waker {
                waker();
            }
        });
    }

    /// Responses that have arrived since the last call.
    pub fn drain(&mut self) -> Vec<RemoteResponse> {
        let mut responses = Vec::new();
        while let Ok(response) = self.rx.try_recv() {
            self.pending = self.pending.saturating_sub(1);
            responses.push(response);
        }
        responses
    }
}

fn execute(client: &BackendClient, request: RemoteRequest) -> RemoteResponse {
    let response = match request {
        RemoteRequest::FetchTree { filename } => {
            let result = client.fetch_tree(filename.as_deref());
            RemoteResponse::Tree { filename, result }
        }
        RemoteRequest::Upload { path } => {
            let stored = client.upload_tree(&path);
            let tree = stored
                .as_ref()
                .ok()
                .map(|stored| client.fetch_tree(Some(stored)));
            RemoteResponse::Uploaded { stored, tree }
        }
        RemoteRequest::Discrete {
            filename,
            top_k,
            support_file,
        } => RemoteResponse::Discrete(client.discrete_analysis(
            filename.as_deref(),
            top_k,
            support_file.as_deref(),
        )),
        RemoteRequest::Matrix { filename } => {
            RemoteResponse::Matrix(client.migration_matrix(filename.as_deref()))
        }
        RemoteRequest::Compare(request) => RemoteResponse::Compared(client.compare(&request)),
    };
    if let Some(err) = response.error() {
        error!("Backend request failed: {err}");
    }
    response
}

impl RemoteResponse {
    pub fn error(&self) -> Option<&RemoteError> {
        match self {
            RemoteResponse::Tree { result, .. } => result.as_ref().err(),
            RemoteResponse::Uploaded { stored, tree } => stored
                .as_ref()
                .err()
                .or_else(|| tree.as_ref().and_then(|tree| tree.as_ref().err())),
            RemoteResponse::Discrete(result) => result.as_ref().err(),
            RemoteResponse::Matrix(result) => result.as_ref().err(),
            RemoteResponse::Compared(result) => result.as_ref().err(),
        }
    }
}
