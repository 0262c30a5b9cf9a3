//! Destination path validation and on-disk cleanup.
//!
//! # Design
//! - Destinations are rejected, never rewritten: no parent references and no
//!   shell-hostile characters.
//! - Deletion targets exactly one entry directly below the job's destination,
//!   derived from the sanitised display name.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use nebula_transfer_core::PENDING_DISPLAY_NAME;
use tokio::fs;

use crate::http::errors::{ApiError, pointer_for};
use crate::models::ProblemInvalidParam;

const FORBIDDEN_CHARS: &[char] = &['<', '>', '|', '*', '?', '"'];

fn invalid_dir(field: &str, message: &str) -> ApiError {
    ApiError::bad_request(format!("{field} {message}")).with_invalid_params(vec![
        ProblemInvalidParam {
            pointer: pointer_for(field),
            message: message.to_string(),
        },
    ])
}

/// Check a destination directory supplied by a client.
pub(crate) fn validate_output_dir(field: &str, dir: &str) -> Result<(), ApiError> {
    if dir.trim().is_empty() {
        return Err(invalid_dir(field, "cannot be empty"));
    }
    if dir.contains("..")
        || Path::new(dir)
            .components()
            .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(invalid_dir(
            field,
            "cannot contain parent directory references",
        ));
    }
    if dir.contains(FORBIDDEN_CHARS) {
        return Err(invalid_dir(field, "contains invalid characters"));
    }
    Ok(())
}

/// Reduce a display name to a single safe path segment.
pub(crate) fn sanitize_name(name: &str) -> Option<String> {
    let replaced: String = name
        .replace("..", "")
        .chars()
        .map(|ch| {
            if matches!(ch, '/' | '\\') || FORBIDDEN_CHARS.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();
    let trimmed = replaced.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Path of a job's downloaded content, when it can be derived safely.
pub(crate) fn download_path(output_dir: &str, torrent_name: &str) -> Option<PathBuf> {
    if torrent_name == PENDING_DISPLAY_NAME {
        return None;
    }
    let segment = sanitize_name(torrent_name)?;
    let mut components = Path::new(&segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }
    let base = Path::new(output_dir);
    let target = base.join(&segment);
    (target.parent() == Some(base)).then_some(target)
}

/// Remove a file or directory tree; a missing target is not an error.
pub(crate) async fn remove_path(path: &Path) -> std::io::Result<bool> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(true)
}
