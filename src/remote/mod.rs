pub mod worker;

use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tree::TreePayload;

pub use worker::{RemoteRequest, RemoteResponse, RemoteWorker};

pub const DEFAULT_TOP_K: u32 = 10;
pub const MAX_TOP_K: u32 = 25;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{message}")]
    NoDefaultTree { message: String },
    #[error("server responded with {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {message}")]
    InvalidResponse { message: String },
    #[error("The backend did not return a file path.")]
    MissingStoredPath,
    #[error("Select at least two trees before running the comparison.")]
    TooFewTrees { selected: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Best-effort message from an error body: a JSON string, then an `error`
/// or `detail` field, then the raw text, then the status reason.
pub fn extract_error_message(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let structured = match &value {
            Value::String(text) => Some(text.clone()),
            Value::Object(object) => ["error", "detail", "message"]
                .iter()
                .find_map(|key| object.get(*key))
                .map(|field| match field {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                }),
            _ => None,
        };
        if let Some(message) = structured.filter(|message| !message.trim().is_empty()) {
            return message;
        }
    }
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Clamp a requested path count into `[1, 25]`; `None` gives the default.
pub fn clamp_top_k(requested: Option<u32>) -> u32 {
    requested.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    stored_path: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

impl UploadResponse {
    fn path(self) -> RemoteResult<String> {
        self.stored_path
            .or(self.filename)
            .filter(|path| !path.trim().is_empty())
            .ok_or(RemoteError::MissingStoredPath)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootProbability {
    pub location: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPath {
    pub src: String,
    pub dst: String,
    pub weight: f64,
    #[serde(default)]
    pub time_median: Option<f64>,
    #[serde(default)]
    pub time_hpd_low: Option<f64>,
    #[serde(default)]
    pub time_hpd_high: Option<f64>,
    #[serde(default)]
    pub bayes_factor: Option<f64>,
    #[serde(default)]
    pub posterior_support: Option<f64>,
    #[serde(default)]
    pub jumps_mean: Option<f64>,
    #[serde(default)]
    pub jumps_hpd_low: Option<f64>,
    #[serde(default)]
    pub jumps_hpd_high: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisExports {
    #[serde(default)]
    pub nodes_csv: Option<String>,
    #[serde(default)]
    pub edges_csv: Option<String>,
    #[serde(default)]
    pub map_geojson: Option<String>,
    #[serde(default)]
    pub summary_md: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteAnalysis {
    pub analysis_id: String,
    #[serde(default)]
    pub root_distribution: Vec<RootProbability>,
    #[serde(default)]
    pub top_paths: Vec<TopPath>,
    #[serde(default)]
    pub exports: AnalysisExports,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationMatrix {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub counts: Vec<Vec<f64>>,
}

impl MigrationMatrix {
    pub fn total(&self) -> f64 {
        self.counts
            .iter()
            .flatten()
            .filter(|value| value.is_finite())
            .sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Loaded {} sources × {} targets ({} transitions).",
            self.sources.len(),
            self.targets.len(),
            crate::tree::format_number(self.total())
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparedTree {
    pub label: String,
    #[serde(default)]
    pub analysis_id: Option<String>,
    #[serde(default)]
    pub root_distribution: Vec<RootProbability>,
    #[serde(default)]
    pub top_paths: Vec<TopPath>,
    #[serde(default)]
    pub exports: AnalysisExports,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathWeight {
    pub label: String,
    pub weight: f64,
    #[serde(default)]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathDifference {
    pub src: String,
    pub dst: String,
    pub delta: f64,
    #[serde(default)]
    pub leading_label: Option<String>,
    #[serde(default)]
    pub weights: Vec<PathWeight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    #[serde(default)]
    pub trees: Vec<ComparedTree>,
    #[serde(default)]
    pub path_differences: Vec<PathDifference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub filenames: Vec<String>,
    pub labels: Vec<String>,
    pub top_k: u32,
}

/// One candidate tree in the comparison list.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonItem {
    pub filename: String,
    pub label: String,
    pub selected: bool,
}

/// Trees queued for comparison. Kept in memory for the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonList {
    pub items: Vec<ComparisonItem>,
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| filename.to_string())
}

impl ComparisonList {
    /// Add a stored file; the label defaults to its file stem. Re-adding a
    /// known file only reselects it.
    pub fn add(&mut self, filename: &str) {
        if let Some(item) = self.items.iter_mut().find(|item| item.filename == filename) {
            item.selected = true;
            return;
        }
        self.items.push(ComparisonItem {
            filename: filename.to_string(),
            label: file_stem(filename),
            selected: true,
        });
    }

    pub fn remove(&mut self, index: usize) {
        if index < self.items.len() {
            self.items.remove(index);
        }
    }

    pub fn selected_count(&self) -> usize {
        self.items.iter().filter(|item| item.selected).count()
    }

    /// Request body for the selected items; blank labels become `Tree N`.
    pub fn request(&self, top_k: Option<u32>) -> RemoteResult<CompareRequest> {
        let selected: Vec<&ComparisonItem> = self.items.iter().filter(|item| item.selected).collect();
        if selected.len() < 2 {
            return Err(RemoteError::TooFewTrees {
                selected: selected.len(),
            });
        }
        Ok(CompareRequest {
            filenames: selected.iter().map(|item| item.filename.clone()).collect(),
            labels: selected
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    let label = item.label.trim();
                    if label.is_empty() {
                        format!("Tree {}", index + 1)
                    } else {
                        label.to_string()
                    }
                })
                .collect(),
            top_k: clamp_top_k(top_k),
        })
    }
}

/// Blocking client for the tree/analysis backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> RemoteResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: extract_error_message(status, &body),
        })
    }

    fn parse<T: DeserializeOwned>(response: Response, what: &str) -> RemoteResult<T> {
        response.json().map_err(|err| RemoteError::InvalidResponse {
            message: format!("failed to parse {what}: {err}"),
        })
    }

    /// `GET /api/tree`; a 404 means no default tree has been uploaded yet.
    pub fn fetch_tree(&self, filename: Option<&str>) -> RemoteResult<TreePayload> {
        let mut request = self.client.get(self.url("/api/tree"));
        if let Some(filename) = filename {
            request = request.query(&[("filename", filename)]);
        }
        debug!("Fetching tree {:?}", filename);
        let response = request.send()?;
        if response.status() == StatusCode::NOT_FOUND {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            let message = if body.trim().is_empty() {
                String::from("Default MCC tree not found. Please upload a file first.")
            } else {
                extract_error_message(status, &body)
            };
            return Err(RemoteError::NoDefaultTree { message });
        }
        let payload: TreePayload = Self::parse(Self::check(response)?, "tree payload")?;
        info!("Fetched tree with {} nodes", payload.nodes.len());
        Ok(payload)
    }

    /// `POST /api/tree/upload`; returns the stored path the backend assigned.
    pub fn upload_tree(&self, path: &Path) -> RemoteResult<String> {
        let form = multipart::Form::new().file("file", path)?;
        let response = self
            .client
            .post(self.url("/api/tree/upload"))
            .multipart(form)
            .send()?;
        let upload: UploadResponse = Self::parse(Self::check(response)?, "upload response")?;
        let stored = upload.path()?;
        info!("Uploaded {} as {stored}", path.display());
        Ok(stored)
    }

    pub fn discrete_analysis(
        &self,
        filename: Option<&str>,
        top_k: Option<u32>,
        support_file: Option<&Path>,
    ) -> RemoteResult<DiscreteAnalysis> {
        let mut form = multipart::Form::new().text("top_k", clamp_top_k(top_k).to_string());
        if let Some(filename) = filename {
            form = form.text("filename", filename.to_string());
        }
        if let Some(support) = support_file {
            form = form.file("support_file", support)?;
        }
        let response = self
            .client
            .post(self.url("/api/analysis/discrete"))
            .multipart(form)
            .send()?;
        let analysis: DiscreteAnalysis = Self::parse(Self::check(response)?, "analysis")?;
        info!(
            "Discrete analysis {} returned {} path(s)",
            analysis.analysis_id,
            analysis.top_paths.len()
        );
        Ok(analysis)
    }

    pub fn migration_matrix(&self, filename: Option<&str>) -> RemoteResult<MigrationMatrix> {
        let mut request = self.client.get(self.url("/api/analysis/migration/matrix"));
        if let Some(filename) = filename {
            request = request.query(&[("filename", filename)]);
        }
        let matrix: MigrationMatrix = Self::parse(Self::check(request.send()?)?, "matrix")?;
        info!("{}", matrix.summary());
        Ok(matrix)
    }

    pub fn compare(&self, request: &CompareRequest) -> RemoteResult<Comparison> {
        let response = self
            .client
            .post(self.url("/api/analysis/discrete/compare"))
            .json(request)
            .send()?;
        let comparison: Comparison = Self::parse(Self::check(response)?, "comparison")?;
        info!("Comparison complete for {} trees", request.filenames.len());
        Ok(comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_extraction_order() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(extract_error_message(status, r#"{"detail":"bad tree"}"#), "bad tree");
        assert_eq!(extract_error_message(status, r#"{"error":"nope"}"#), "nope");
        assert_eq!(extract_error_message(status, r#""plain json""#), "plain json");
        assert_eq!(extract_error_message(status, "oops"), "oops");
        assert_eq!(extract_error_message(status, "  "), "Bad Request");
        assert_eq!(extract_error_message(status, r#"{"other":1}"#), r#"{"other":1}"#);
    }

    #[test]
    fn top_k_is_clamped() {
        assert_eq!(clamp_top_k(None), 10);
        assert_eq!(clamp_top_k(Some(0)), 1);
        assert_eq!(clamp_top_k(Some(99)), 25);
        assert_eq!(clamp_top_k(Some(7)), 7);
    }

    #[test]
    fn upload_prefers_stored_path() {
        let both: UploadResponse =
            serde_json::from_str(r#"{"filename":"a.tree","stored_path":"/data/a.tree"}"#).unwrap();
        assert_eq!(both.path().unwrap(), "/data/a.tree");
        let name_only: UploadResponse = serde_json::from_str(r#"{"filename":"a.tree"}"#).unwrap();
        assert_eq!(name_only.path().unwrap(), "a.tree");
        let empty: UploadResponse = serde_json::from_str("{}").unwrap();
        assert!(matches!(empty.path(), Err(RemoteError::MissingStoredPath)));
    }

    #[test]
    fn matrix_summary_counts_transitions() {
        let matrix: MigrationMatrix = serde_json::from_str(
            r#"{"sources":["A","B"],"targets":["A","B","C"],"counts":[[0,2,1],[3,0,0]]}"#,
        )
        .unwrap();
        assert_eq!(matrix.total(), 6.0);
        assert_eq!(matrix.summary(), "Loaded 2 sources × 3 targets (6 transitions).");
    }

    #[test]
    fn comparison_list_builds_requests() {
        let mut list = ComparisonList::default();
        list.add("/uploads/first.tree");
        assert!(matches!(
            list.request(None),
            Err(RemoteError::TooFewTrees { selected: 1 })
        ));
        list.add("/uploads/second.nex");
        list.add("/uploads/first.tree");
        assert_eq!(list.items.len(), 2);
        list.items[1].label = String::from("  ");
        let request = list.request(Some(40)).unwrap();
        assert_eq!(request.labels, vec!["first", "Tree 2"]);
        assert_eq!(request.top_k, 25);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["filenames"][1], "/uploads/second.nex");
    }

    #[test]
    fn analysis_payload_tolerates_optional_fields() {
        let analysis: DiscreteAnalysis = serde_json::from_str(
            r#"{"analysis_id":"x1","root_distribution":[{"location":"Kenya","probability":0.8}],
                "top_paths":[{"src":"Kenya","dst":"Peru","weight":3.5,"time_median":2001.2}],
                "exports":{"summary_md":"/exports/x1.md"}}"#,
        )
        .unwrap();
        assert_eq!(analysis.top_paths[0].bayes_factor, None);
        assert_eq!(analysis.exports.summary_md.as_deref(), Some("/exports/x1.md"));
    }
}
