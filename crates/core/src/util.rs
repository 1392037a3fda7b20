/// Joins path segments with single slashes, preserving a leading slash
/// on the first segment and skipping empty parts.
pub fn merge_path(segments: &[&str]) -> String {
    let mut out = String::new();

    for segment in segments {
        let trimmed = segment.trim_matches('/');

        if segment.starts_with('/') && out.is_empty() {
            out.push('/');
        }

        if trimmed.is_empty() {
            continue;
        }

        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }

        out.push_str(trimmed);
    }

    out
}

/// Collapses `.` and `..` components in a slash-separated path.
/// Leading `..` components that would escape the root are kept as-is.
pub fn simplify_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&last) if last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");

    if path.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Returns the directory part of a path-like name, `""` when the name
/// has no parent.
pub fn parent_dir(name: &str) -> &str {
    match name.rfind('/') {
        Some(idx) => &name[..idx],
        None => "",
    }
}

/// Stamps a version number on a reference that could not be resolved,
/// so clients still get a cache-busting URL.
pub fn version_query(path: &str, version: u64) -> String {
    if path.contains('?') {
        format!("{path}&versionNumber={version}")
    } else {
        format!("{path}?versionNumber={version}")
    }
}
