//! Filename and object-path helpers.
//!
//! Folder names are free text in the configuration; they are slugified before
//! being used as part of a remote object path so the same folder always lands
//! at the same key, whatever the platform.

use sha2::{Digest, Sha256};

/// Bytes of the name digest kept in slugs of non-ASCII names.
const HASH_SUFFIX_BYTES: usize = 4;

/// Turn free text into a lowercase, dash-separated slug.
///
/// ASCII letters and digits are kept (lowercased), every other run of
/// characters collapses into a single `-`, and leading/trailing dashes are
/// trimmed. Names with non-ASCII characters get a short hash of the original
/// text appended so that, say, two Cyrillic names do not share a slug.
/// Returns `"unnamed"` when nothing survives from a pure ASCII name.
///
/// ```
/// use harpo::utils::filename::slugify;
///
/// assert_eq!(slugify("My Documents"), "my-documents");
/// assert_eq!(slugify("  photos_2024!! "), "photos-2024");
/// assert_eq!(slugify("???"), "unnamed");
/// assert_eq!(slugify("Фото"), "45c2f1fa");
/// ```
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if !input.is_ascii() {
        let digest = Sha256::digest(input.as_bytes());
        let suffix = hex::encode(&digest[..HASH_SUFFIX_BYTES]);
        if slug.is_empty() {
            return suffix;
        }
        return format!("{slug}-{suffix}");
    }

    if slug.is_empty() {
        return "unnamed".to_string();
    }
    slug
}

/// Compute the remote object path of a folder's archive.
///
/// The result is `<destination>/<slug(folder_name)>.harpo<extension>`, always
/// using `/` separators, with redundant separators and `.` segments removed.
pub fn archive_object_path(folder_name: &str, destination: &str, extension: &str) -> String {
    let file_name = format!("{}.harpo{}", slugify(folder_name), extension);

    let normalized = destination.replace('\\', "/");
    let mut segments: Vec<&str> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    segments.push(&file_name);

    let joined = segments.join("/");
    if normalized.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}
