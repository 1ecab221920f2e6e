//! Connectivity check shared by the storage backends.

use super::StorageProvider;
use crate::{Error, Result};

pub const PROBE_PATH: &str = "harpo.test";
pub const PROBE_CONTENT: &str = "Hi dear! It's Harpo!🤗";

/// Upload, download, compare, stat and delete a small marker object.
///
/// The error names the step that failed and the steps that already passed.
pub async fn connectivity_probe(storage: &dyn StorageProvider) -> Result<()> {
    let mut passed: Vec<&str> = Vec::new();
    let fail = |passed: &[&str], step: &str, cause: &dyn std::fmt::Display| {
        let done = if passed.is_empty() {
            String::new()
        } else {
            format!(" (passed: {})", passed.join(", "))
        };
        Error::Storage(format!("connectivity test failed at {step}{done}: {cause}"))
    };

    let reader = Box::new(std::io::Cursor::new(PROBE_CONTENT.as_bytes().to_vec()));
    storage
        .upload(PROBE_PATH, reader, "text/plain")
        .await
        .map_err(|e| fail(&passed, "upload", &e))?;
    passed.push("upload");

    let mut buf: Vec<u8> = Vec::new();
    storage
        .download(PROBE_PATH, &mut buf)
        .await
        .map_err(|e| fail(&passed, "download", &e))?;
    passed.push("download");

    if buf != PROBE_CONTENT.as_bytes() {
        return Err(fail(&passed, "compare", &"downloaded content differs"));
    }
    passed.push("compare");

    let info = storage
        .info(PROBE_PATH)
        .await
        .map_err(|e| fail(&passed, "info", &e))?;
    if info.size != PROBE_CONTENT.len() as u64 {
        return Err(fail(
            &passed,
            "info",
            &format!("reported size {} instead of {}", info.size, PROBE_CONTENT.len()),
        ));
    }
    passed.push("info");

    storage
        .delete(PROBE_PATH)
        .await
        .map_err(|e| fail(&passed, "delete", &e))?;

    Ok(())
}
