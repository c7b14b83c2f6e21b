//! Fix/gen backend collaborator: wire types and the HTTP client.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::config::BackendSettings;
use crate::error::PatchError;
use crate::types::{ChangeBlock, Lang, SuspectCandidate};

/// Which agent produced a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    Fix,
    Gen,
}

impl PatchOrigin {
    fn segment(&self) -> &'static str {
        match self {
            PatchOrigin::Fix => "fix",
            PatchOrigin::Gen => "gen",
        }
    }
}

/// Body of a `/agent/{fix,gen}/preview` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewCall {
    #[serde(skip)]
    pub origin: PatchOrigin,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<Lang>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub opened_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_file: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub force_target: bool,
}

/// Body of a `/agent/{fix,gen}/apply` request; the diff is replayed verbatim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyCall {
    #[serde(skip)]
    pub origin: PatchOrigin,
    pub project_id: String,
    pub run_id: Option<String>,
    pub diff: String,
}

/// Body of a `/run` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCall {
    pub project_id: String,
    pub entry: String,
    pub lang: Lang,
}

/// One patch proposed by the agent
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PatchPayload {
    pub kind: Option<String>,
    pub target: Option<String>,
    pub note: Option<String>,
    pub diff_preview: Option<String>,
}

/// Diagnostic metadata attached to an agent response
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResponseMeta {
    pub blocks: Option<Vec<ChangeBlock>>,
    pub failure_type: Option<String>,
    pub explanation: Option<String>,
    pub estimated: Option<bool>,
    pub selected_file: Option<String>,
    pub suspect_candidates: Option<Vec<SuspectCandidate>>,
}

/// Response of the preview and apply endpoints.
///
/// Every field is optional on the wire; gen previews may carry `blocks` and
/// `diff` at the top level instead of under `meta`/`patches`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentResponse {
    pub ok: bool,
    pub reason: Option<String>,
    pub patches: Vec<PatchPayload>,
    pub suggested_next: Option<String>,
    pub meta: ResponseMeta,
    pub blocks: Option<Vec<ChangeBlock>>,
    pub diff: Option<String>,
}

impl AgentResponse {
    /// Unified diff text of the first patch, if any non-blank one was sent
    pub fn diff_text(&self) -> Option<&str> {
        self.patches
            .first()
            .and_then(|p| p.diff_preview.as_deref())
            .or(self.diff.as_deref())
            .filter(|d| !d.trim().is_empty())
    }

    /// Pre-parsed blocks, preferring `meta.blocks`
    pub fn blocks(&self) -> Option<&[ChangeBlock]> {
        self.meta.blocks.as_deref().or(self.blocks.as_deref())
    }
}

static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[RUN_ID\]\s*([a-zA-Z0-9_-]+)").expect("run id pattern"));

/// Outcome of running the user's program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub ok: bool,
    pub output: String,
}

impl RunReport {
    /// Interpret raw run output: the runner tags its id with `[RUN_ID]` and
    /// any error marker counts as a failed run.
    pub fn from_output(output: String) -> Self {
        let run_id = RUN_ID_RE
            .captures(&output)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let failed = ["[ERROR]", "Error", "Exception"]
            .iter()
            .any(|marker| output.contains(marker));
        Self {
            run_id,
            ok: !failed,
            output,
        }
    }
}

/// Everything the patch workflow needs from the server side
#[async_trait]
pub trait FixBackend: Send + Sync {
    async fn preview(&self, call: &PreviewCall) -> Result<AgentResponse, PatchError>;

    async fn apply(&self, call: &ApplyCall) -> Result<AgentResponse, PatchError>;

    /// Authoritative file content, used to reload a buffer after apply
    async fn read_file(&self, project_id: &str, path: &str) -> Result<String, PatchError>;

    async fn run(&self, call: &RunCall) -> Result<RunReport, PatchError>;
}

#[derive(Deserialize)]
struct FileContent {
    content: String,
}

#[derive(Deserialize)]
struct RunOutput {
    #[serde(default)]
    output: String,
}

/// JSON-over-HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base: Url,
    client: Client,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, PatchError> {
        let mut base = settings.api_base.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn post<T: Serialize + Sync, R: DeserializeOwned>(&self, path: &str, body: &T) -> Result<R, PatchError> {
        let url = self.base.join(path)?;
        debug!("POST {}", url);
        let response = self.client.post(url).json(body).send().await?;
        Self::decode(path, response).await
    }

    async fn decode<R: DeserializeOwned>(path: &str, response: reqwest::Response) -> Result<R, PatchError> {
        let status = response.status();
        debug!("{} response status: {}", path, status);

        let text = response.text().await?;
        if !status.is_success() {
            error!("{} failed with status {}: {}", path, status, text);
            return Err(PatchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl FixBackend for HttpBackend {
    async fn preview(&self, call: &PreviewCall) -> Result<AgentResponse, PatchError> {
        let path = format!("agent/{}/preview", call.origin.segment());
        self.post(&path, call).await
    }

    async fn apply(&self, call: &ApplyCall) -> Result<AgentResponse, PatchError> {
        let path = format!("agent/{}/apply", call.origin.segment());
        self.post(&path, call).await
    }

    async fn read_file(&self, project_id: &str, path: &str) -> Result<String, PatchError> {
        let mut url = self.base.join("files/read")?;
        url.query_pairs_mut()
            .append_pair("project_id", project_id)
            .append_pair("path", path);
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        let file: FileContent = Self::decode("files/read", response).await?;
        Ok(file.content)
    }

    async fn run(&self, call: &RunCall) -> Result<RunReport, PatchError> {
        let run: RunOutput = self.post("run", call).await?;
        Ok(RunReport::from_output(run.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_fix_preview_response() {
        let json = r#"{
            "ok": true,
            "project_id": "p1",
            "run_id": "r1",
            "fixed": false,
            "reason": "llm diff",
            "patches": [{
                "kind": "apply_unified_diff",
                "target": "main.js",
                "note": "preview",
                "diff_preview": "--- a/main.js\n+++ b/main.js\n@@ -1 +1 @@\n-a\n+b\n"
            }],
            "suggested_next": "confirm_apply",
            "meta": {
                "failure_type": "reference_error",
                "explanation": "x is undefined. Define it.",
                "selected_file": "main.js",
                "suspect_candidates": ["main.js", "lib.js"],
                "blocks": [{
                    "filePath": "main.js",
                    "oldStart": 1, "oldLength": 1, "newStart": 1, "newLength": 1,
                    "lines": [
                        { "type": "del", "content": "a", "oldLine": 1 },
                        { "type": "add", "content": "b", "newLine": 1 }
                    ]
                }]
            }
        }"#;
        let response: AgentResponse = serde_json::from_str(json).unwrap();
        assert!(response.ok);
        assert!(response.diff_text().unwrap().starts_with("--- a/main.js"));
        assert_eq!(response.blocks().unwrap().len(), 1);
        assert_eq!(response.meta.selected_file.as_deref(), Some("main.js"));
        assert_eq!(response.meta.suspect_candidates.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_minimal_response() {
        let response: AgentResponse = serde_json::from_str("{}").unwrap();
        assert!(!response.ok);
        assert_eq!(response.diff_text(), None);
        assert_eq!(response.blocks(), None);
    }

    #[test]
    fn test_top_level_gen_fields() {
        let json = r#"{ "ok": true, "diff": "@@ -0,0 +1 @@\n+x\n", "blocks": [] }"#;
        let response: AgentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.diff_text(), Some("@@ -0,0 +1 @@\n+x\n"));
        assert_eq!(response.blocks().map(|b| b.len()), Some(0));
    }

    #[test]
    fn test_blank_diff_is_no_diff() {
        let response = AgentResponse {
            patches: vec![PatchPayload {
                diff_preview: Some("  \n".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(response.diff_text(), None);
    }

    #[test]
    fn test_preview_call_body() {
        let call = PreviewCall {
            origin: PatchOrigin::Fix,
            project_id: "p1".to_string(),
            run_id: Some("r1".to_string()),
            entry: Some("main.js".to_string()),
            lang: Some(Lang::Node),
            prompt: None,
            opened_files: vec!["main.js".to_string()],
            selected_file: None,
            force_target: false,
        };
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["lang"], "node");
        assert_eq!(value["run_id"], "r1");
        assert!(value.get("origin").is_none());
        assert!(value.get("prompt").is_none());
        assert!(value.get("force_target").is_none());
    }

    #[test]
    fn test_run_report_from_output() {
        let report = RunReport::from_output("[RUN_ID] run_42\nhello\n".to_string());
        assert_eq!(report.run_id.as_deref(), Some("run_42"));
        assert!(report.ok);

        let report = RunReport::from_output("[RUN_ID] r-1\nReferenceError: x is not defined".to_string());
        assert!(!report.ok);
    }

    #[test]
    fn test_http_backend_base_url_normalized() {
        let settings = BackendSettings {
            api_base: "http://localhost:8000/api".to_string(),
            timeout_secs: 5,
        };
        let backend = HttpBackend::new(&settings).unwrap();
        assert_eq!(backend.base_url().as_str(), "http://localhost:8000/api/");
        assert_eq!(
            backend.base_url().join("agent/fix/preview").unwrap().as_str(),
            "http://localhost:8000/api/agent/fix/preview"
        );
    }

    #[test]
    fn test_http_backend_rejects_bad_url() {
        let settings = BackendSettings {
            api_base: "not a url".to_string(),
            timeout_secs: 5,
        };
        assert!(matches!(HttpBackend::new(&settings), Err(PatchError::InvalidBaseUrl(_))));
    }
}
