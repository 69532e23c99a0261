//! Submission of a written report to the Coveralls jobs API.

use std::fs;
use std::path::Path;

use crate::error::{GatherError, Result};

pub const DEFAULT_ENDPOINT: &str = "https://coveralls.io/api/v1/jobs";

const BOUNDARY: &str = "------------------------coveralls-gather-7f3c9a1e5b";

/// A `multipart/form-data` body with a single `json_file` part.
fn multipart_body(file_name: &str, json: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(json.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"json_file\"; filename=\"{}\"\r\n",
            file_name.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/json\r\n\r\n");
    body.extend_from_slice(json);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// POST the report at `path` to `endpoint` and return the response body.
///
/// The file is left in place whatever the outcome.
pub fn upload(path: &Path, endpoint: &str) -> Result<String> {
    let json = fs::read(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("coveralls.json");

    log::info!("uploading {} to {}", path.display(), endpoint);
    let resp = ureq::post(endpoint)
        .set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .set("User-Agent", concat!("coveralls-gather/", env!("CARGO_PKG_VERSION")))
        .send_bytes(&multipart_body(file_name, &json));

    match resp {
        Ok(resp) => resp
            .into_string()
            .map_err(|e| GatherError::Transport(format!("cannot read response: {}", e))),
        Err(ureq::Error::Status(status, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            Err(GatherError::Upload { status, body })
        }
        Err(e) => Err(GatherError::Transport(e.to_string())),
    }
}
