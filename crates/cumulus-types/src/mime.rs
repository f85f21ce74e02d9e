//! Mimetype helpers.
//!
//! Detection is by extension only. Content sniffing belongs to the storage
//! backends that can afford to read bytes.

/// Mimetype used for every directory entry.
pub const DIR_MIMETYPE: &str = "httpd/unix-directory";

const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Guess a mimetype from a file name.
pub fn mimetype_for_name(name: &str) -> &'static str {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return DEFAULT_MIMETYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "odt" => "application/vnd.oasis.opendocument.text",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => DEFAULT_MIMETYPE,
    }
}

/// The part before the slash (`"text"` for `"text/plain"`).
pub fn mime_part(mimetype: &str) -> &str {
    mimetype.split_once('/').map(|(part, _)| part).unwrap_or(mimetype)
}
