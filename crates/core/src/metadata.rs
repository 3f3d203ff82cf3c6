//! Vendor-specific `CurrentURIMetaData` (DIDL-Lite) for SetAVTransportURI
//!
//! Renderers disagree on whether they want metadata at all. LG wants a video
//! item with a matching protocolInfo; Samsung, Sony and Philips sets play
//! fine with none. Unknown vendors get no metadata.

use crate::models::Target;

/// Builds the metadata string for a target and negotiated MIME type
pub type MetadataFormatter = fn(&Target, &str) -> String;

/// Lookup table keyed by lowercase vendor name
const VENDOR_FORMATTERS: &[(&str, MetadataFormatter)] = &[
    ("samsung", no_metadata),
    ("lg", lg_metadata),
    ("sony", no_metadata),
    ("philips", no_metadata),
];

/// Metadata for `vendor`; an empty string means "send no metadata"
pub fn metadata_for_vendor(vendor: &str, target: &Target, mime: &str) -> String {
    let vendor = vendor.trim().to_lowercase();
    let formatter = VENDOR_FORMATTERS
        .iter()
        .find(|(name, _)| *name == vendor)
        .map(|(_, f)| *f)
        .unwrap_or(no_metadata);

    formatter(target, mime)
}

fn no_metadata(_target: &Target, _mime: &str) -> String {
    String::new()
}

fn lg_metadata(target: &Target, mime: &str) -> String {
    let protocol_info = format!("http-get:*:{}:*", mime);

    let mut didl = String::new();
    didl.push_str(r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#);
    didl.push_str(r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#);
    didl.push_str(r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#);
    didl.push_str(r#"<item id="0" parentID="0" restricted="1">"#);
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(media_title(&target.media_url))));
    didl.push_str("<upnp:class>object.item.videoItem</upnp:class>");
    didl.push_str(&format!(
        r#"<res protocolInfo="{}">{}</res>"#,
        escape_xml(&protocol_info),
        escape_xml(&target.media_url)
    ));
    didl.push_str("</item></DIDL-Lite>");
    didl
}

/// Last path segment of the media URL, or "Video"
fn media_title(media_url: &str) -> &str {
    media_url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("Video")
}

/// Escape XML special characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Target {
        Target::control("http://10.0.0.2:1234/ctl").with_media("http://10.0.0.9:8000/movie.mp4")
    }

    #[test]
    fn test_unknown_vendor_gets_no_metadata() {
        assert_eq!(metadata_for_vendor("", &target(), "video/mp4"), "");
        assert_eq!(metadata_for_vendor("acme", &target(), "video/mp4"), "");
        assert_eq!(metadata_for_vendor("samsung", &target(), "video/mp4"), "");
    }

    #[test]
    fn test_lg_metadata_is_video_item() {
        let didl = metadata_for_vendor("LG", &target(), "video/mp4");
        assert!(didl.starts_with("<DIDL-Lite"));
        assert!(didl.contains("<dc:title>movie.mp4</dc:title>"));
        assert!(didl.contains("<upnp:class>object.item.videoItem</upnp:class>"));
        assert!(didl.contains(r#"protocolInfo="http-get:*:video/mp4:*""#));
        assert!(didl.contains(">http://10.0.0.9:8000/movie.mp4</res>"));
    }

    #[test]
    fn test_lg_metadata_escapes_url() {
        let target = Target::control("http://tv/ctl").with_media("http://h/v.mp4?a=1&b=2");
        let didl = metadata_for_vendor("lg", &target, "video/mp4");
        assert!(didl.contains("v.mp4?a=1&amp;b=2</res>"));
        assert_eq!(metadata_for_vendor("sony", &target, "video/mp4"), "");
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a & <b>"), "a &amp; &lt;b&gt;");
        assert_eq!(escape_xml("It's \"x\""), "It&apos;s &quot;x&quot;");
    }

    #[test]
    fn test_media_title_fallback() {
        assert_eq!(media_title("http://host/"), "Video");
        assert_eq!(media_title("http://host/a/clip.mkv?token=1"), "clip.mkv");
    }
}
