use crate::models::MediaMap;

/// MIME type used when the renderer reported nothing usable
pub const FALLBACK_MIME: &str = "video/mpeg";

/// Candidate MIME types for a media URL, most specific first
pub fn mime_candidates(media_url: &str) -> Vec<&'static str> {
    let path = media_url.split(['?', '#']).next().unwrap_or(media_url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => vec!["video/mp4", "video/x-mp4"],
        "mkv" => vec!["video/x-matroska", "video/x-mkv"],
        "ts" | "m2ts" => vec!["video/mp2t", "video/vnd.dlna.mpeg-tts", "video/mpeg"],
        "mpg" | "mpeg" => vec!["video/mpeg"],
        "avi" => vec!["video/x-msvideo", "video/avi"],
        "webm" => vec!["video/webm"],
        "mp3" => vec!["audio/mpeg"],
        "flac" => vec!["audio/flac", "audio/x-flac"],
        "wav" => vec!["audio/wav", "audio/x-wav"],
        "jpg" | "jpeg" => vec!["image/jpeg"],
        "png" => vec!["image/png"],
        _ => vec![FALLBACK_MIME],
    }
}

/// Pick the first candidate the renderer declared support for.
///
/// Falls back to [`FALLBACK_MIME`] when the renderer reported no media
/// types or none of the candidates match.
pub fn select_mime(candidates: &[&str], supported: &MediaMap) -> String {
    if supported.is_empty() {
        return FALLBACK_MIME.to_string();
    }

    candidates
        .iter()
        .find(|cand| supported.contains_key(**cand))
        .map(|cand| cand.to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}
