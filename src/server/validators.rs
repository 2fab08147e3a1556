//! Input validation for the backend endpoints.

use super::errors::ApiError;

lazy_static::lazy_static! {
    /// `s3://<bucket>/<key>`; bucket names are 3-63 chars of `[a-z0-9.-]`.
    static ref S3_URI: regex::Regex =
        regex::Regex::new(r"^s3://([a-z0-9.-]{3,63})/(.+)$").unwrap();

    /// Plain file names with a tabular or JSON extension, no directories.
    static ref FILENAME: regex::Regex =
        regex::Regex::new(r"^([a-zA-Z0-9_-]+)\.(tsv|csv|json)$").unwrap();
}

/// Split a valid S3 URI into `(bucket, key)`.
pub(crate) fn validate_s3_uri(uri: Option<&str>) -> Result<(String, String), ApiError> {
    let uri = uri
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::Validation("S3 URI is required".into()))?;

    let caps = S3_URI
        .captures(uri)
        .ok_or_else(|| ApiError::Validation(format!("Invalid S3 URI: {uri}")))?;

    Ok((caps[1].to_string(), caps[2].to_string()))
}

pub(crate) fn validate_filename(filename: Option<&str>) -> Result<&str, ApiError> {
    let filename = filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::Validation("Filename is required".into()))?;

    if !FILENAME.is_match(filename) {
        return Err(ApiError::Validation(format!("Invalid filename: {filename}")));
    }
    Ok(filename)
}

/// Extract the `content` string from a `{"content": ...}` body.
pub(crate) fn validate_content(body: Option<&serde_json::Value>) -> Result<String, ApiError> {
    body.and_then(|b| b.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ApiError::Validation("Input content is required".into()))
}

/// Relative download path for an object key, refusing keys that would land
/// outside the downloads directory.
pub(crate) fn download_path(downloads_dir: &str, key: &str) -> Result<String, ApiError> {
    let escapes = key.starts_with('/')
        || key.ends_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part == ".." || part == "." || part.is_empty());
    if escapes {
        return Err(ApiError::Validation(format!("Invalid S3 key: {key}")));
    }
    Ok(format!("{downloads_dir}/{key}"))
}
