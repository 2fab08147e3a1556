use serde::{Deserialize, Serialize};

// --- Query strings ---

#[derive(Deserialize)]
pub(super) struct RerouteQuery {
    pub route: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct S3Query {
    pub uri: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct FileWriteQuery {
    pub path: Option<String>,
}

// --- Responses ---

#[derive(Serialize)]
pub(super) struct EnabledResponse {
    pub enabled: bool,
}

#[derive(Serialize)]
pub(super) struct VersionResponse {
    pub version: &'static str,
}

#[derive(Serialize)]
pub(super) struct PathResponse {
    pub path: String,
}
