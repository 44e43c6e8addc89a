//! Saving response content to disk.

use crate::error::HttpError;
use http::HeaderMap;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use url::Url;

/// Extensions for common content types, consulted before `mime_guess`,
/// whose reverse table is alphabetical rather than conventional.
const KNOWN_EXTENSIONS: &[(&str, &str)] = &[
    ("application/gzip", ".gz"),
    ("application/javascript", ".js"),
    ("application/json", ".json"),
    ("application/pdf", ".pdf"),
    ("application/xml", ".xml"),
    ("application/zip", ".zip"),
    ("image/gif", ".gif"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/svg+xml", ".svg"),
    ("image/webp", ".webp"),
    ("text/css", ".css"),
    ("text/csv", ".csv"),
    ("text/html", ".html"),
    ("text/javascript", ".js"),
    ("text/plain", ".txt"),
    ("text/xml", ".xml"),
];

/// Pick the file name for a download.
///
/// In order: the explicit name, the `Content-Disposition` filename
/// (`filename*` preferred), or the last URL path segment (a timestamp when
/// the path is empty) with an extension derived from `Content-Type`.
pub(crate) fn file_name(explicit: Option<&str>, headers: &HeaderMap, url: &Url) -> String {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return name.to_owned();
    }

    if let Some(name) = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
    {
        return name;
    }

    let mut name = last_path_segment(url)
        .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d%H%M%S").to_string());

    let extension = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(extension_for);

    if let Some(ext) = extension
        && !name.to_ascii_lowercase().ends_with(&ext)
    {
        name.push_str(&ext);
    }

    name
}

/// Write `content` to `dir/name` and return the full path.
pub(crate) fn write(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf, HttpError> {
    let path = dir.join(name);
    std::fs::write(&path, content).map_err(|e| HttpError::io(path.display().to_string(), e))?;
    tracing::debug!(path = %path.display(), bytes = content.len(), "saved response body");
    Ok(path)
}

/// Extract the filename parameter of a `Content-Disposition` header.
fn disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').skip(1) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if key.eq_ignore_ascii_case("filename*") {
            // RFC 5987: charset'language'percent-encoded
            let encoded = val.rsplit('\'').next().unwrap_or(val);
            extended = urlencoding::decode(encoded).ok().map(|s| s.into_owned());
        } else if key.eq_ignore_ascii_case("filename") {
            plain = Some(val.trim_matches('"').to_owned());
        }
    }

    extended
        .or(plain)
        .as_deref()
        .and_then(base_name)
        .map(str::to_owned)
}

fn last_path_segment(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.rfind(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?;
    base_name(&decoded).map(str::to_owned)
}

/// Strip any directory components; reject names that are not plain file names.
fn base_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next()?.trim();
    match base {
        "" | "." | ".." => None,
        _ => Some(base),
    }
}

fn extension_for(content_type: &str) -> Option<String> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.is_empty() || essence == "application/octet-stream" {
        return None;
    }

    if let Some((_, ext)) = KNOWN_EXTENSIONS.iter().find(|(mime, _)| *mime == essence) {
        return Some((*ext).to_owned());
    }

    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map(|ext| format!(".{ext}"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_explicit_name_wins() {
        let h = headers(&[("content-disposition", "attachment; filename=\"server.bin\"")]);
        assert_eq!(
            file_name(Some("mine.dat"), &h, &url("http://x/a.txt")),
            "mine.dat"
        );
    }

    #[test]
    fn test_disposition_filename() {
        let h = headers(&[("content-disposition", "attachment; filename=\"report.pdf\"")]);
        assert_eq!(file_name(None, &h, &url("http://x/download")), "report.pdf");
    }

    #[test]
    fn test_disposition_extended_filename_preferred() {
        let h = headers(&[(
            "content-disposition",
            "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt",
        )]);
        assert_eq!(file_name(None, &h, &url("http://x/d")), "na\u{ef}ve file.txt");
    }

    #[test]
    fn test_disposition_path_components_removed() {
        let h = headers(&[("content-disposition", "attachment; filename=\"../../etc/passwd\"")]);
        assert_eq!(file_name(None, &h, &url("http://x/d")), "passwd");
    }

    #[test]
    fn test_url_segment_with_content_type_extension() {
        let h = headers(&[("content-type", "image/png")]);
        assert_eq!(file_name(None, &h, &url("http://x/img")), "img.png");
    }

    #[test]
    fn test_extension_not_duplicated() {
        let h = headers(&[("content-type", "image/png")]);
        assert_eq!(file_name(None, &h, &url("http://x/pics/cat.PNG")), "cat.PNG");
    }

    #[test]
    fn test_trailing_slash_uses_last_segment() {
        let h = headers(&[("content-type", "application/json; charset=utf-8")]);
        assert_eq!(file_name(None, &h, &url("http://x/api/users/")), "users.json");
    }

    #[test]
    fn test_empty_path_uses_timestamp() {
        let h = headers(&[("content-type", "text/plain")]);
        let name = file_name(None, &h, &url("http://x/"));
        let stem = name.strip_suffix(".txt").unwrap();
        assert_eq!(stem.len(), 14, "got {name}");
        assert!(stem.chars().all(|c| c.is_ascii_digit()), "got {name}");
    }

    #[test]
    fn test_octet_stream_gets_no_extension() {
        let h = headers(&[("content-type", "application/octet-stream")]);
        assert_eq!(file_name(None, &h, &url("http://x/blob")), "blob");
    }

    #[test]
    fn test_mime_guess_fallback() {
        assert_eq!(extension_for("audio/flac").as_deref(), Some(".flac"));
        assert_eq!(extension_for("application/x-unknown-thing"), None);
    }

    #[test]
    fn test_write_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "out.txt", b"saved").unwrap();
        assert_eq!(path, dir.path().join("out.txt"));
        assert_eq!(std::fs::read(path).unwrap(), b"saved");
    }

    #[test]
    fn test_write_to_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = write(&missing, "out.txt", b"x").unwrap_err();
        assert!(matches!(err, HttpError::Io { .. }), "got {err:?}");
    }
}
