// SPDX-License-Identifier: Apache-2.0

//! Scope-to-directory path builder (C3, §3, §4.3).

use std::path::{Path, PathBuf};

/// Maximum length, in bytes, of a single sanitized scope component.
pub const MAX_COMPONENT_LEN: usize = 128;

/// Identifies the sequence namespace and on-disk directory for one scope.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Optional project identifier.
    pub project_id: Option<String>,
    /// Optional pipeline identifier.
    pub pipeline_id: Option<String>,
    /// Required agent identifier; bounds the sequence namespace.
    pub agent_id: String,
}

/// Replaces every byte outside `{letter, digit, '.', '-', '_'}` with `'_'`,
/// then truncates to [`MAX_COMPONENT_LEN`] bytes on a UTF-8 boundary, then
/// guards against the sanitized result being exactly `.` or `..` (which
/// would otherwise resolve to the current or parent directory once joined
/// onto the WAL root).
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.len() > MAX_COMPONENT_LEN {
        let mut end = MAX_COMPONENT_LEN;
        while end > 0 && !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }

    if sanitized == "." || sanitized == ".." {
        sanitized = "__".to_string();
    }

    sanitized
}

/// Builds the on-disk directory for a scope: `{wal_dir}/[{project}/{pipeline}/]{agent}/`.
/// Empty or absent components are skipped rather than producing doubled
/// separators. Pure — callers create the directory separately.
#[must_use]
pub fn scope_dir(wal_dir: &Path, scope: &Scope) -> PathBuf {
    let mut dir = wal_dir.to_path_buf();
    for component in [scope.project_id.as_deref(), scope.pipeline_id.as_deref()] {
        if let Some(raw) = component {
            let sanitized = sanitize_component(raw);
            if !sanitized.is_empty() {
                dir.push(sanitized);
            }
        }
    }
    dir.push(sanitize_component(&scope.agent_id));
    dir
}
