/// Failures surfaced by the patch workflow.
///
/// Malformed diff lines, stale line references and rejected concurrent
/// requests are not errors: they are skipped, fall back, or are ignored.
#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    #[error("no patch available to preview or apply")]
    NoPreviewAvailable,
    #[error("backend request failed")]
    Network(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode backend response")]
    Decode(#[from] serde_json::Error),
    #[error("invalid backend url")]
    InvalidBaseUrl(#[from] url::ParseError),
}
