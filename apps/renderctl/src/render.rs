//! Plain-text reports for the cache and scan commands

use chrono::Local;
use renderctl_core::{DetectedDevice, Endpoint, MediaMap, Resolution};
use renderctl_persistence::{CacheEntry, DeviceCache};
use renderctl_resolver::ScanReport;
use std::collections::BTreeMap;
use std::fmt::Write;

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// One row per cached device, in selection-index order
pub fn cache_table(cache: &DeviceCache) -> String {
    if cache.is_empty() {
        return format!("No cached devices ({})\n", cache.path().display());
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<3} {:<15} {:<8} {:<50} {}",
        "#", "IP", "VENDOR", "CONTROL URL", "CONNMGR URL"
    );
    for entry in cache.list() {
        let (control, conn_mgr) = match entry.primary() {
            Some(ep) => (ep.control_url.as_str(), ep.conn_mgr_url.as_str()),
            None => ("(no playable endpoint)", ""),
        };
        let _ = writeln!(
            out,
            "{:<3} {:<15} {:<8} {:<50} {}",
            entry.index,
            entry.ip,
            or_dash(&entry.device.vendor),
            control,
            or_dash(conn_mgr)
        );
    }
    out
}

/// Endpoint tree of one cached device
pub fn device_details(entry: &CacheEntry<'_>, show_media: bool) -> String {
    let device = entry.device;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[{}] {} {}",
        entry.index,
        entry.ip,
        device.friendly_name().map(|n| format!("({})", n)).unwrap_or_default()
    );
    let _ = writeln!(out, "  vendor: {}", or_dash(&device.vendor));
    for (key, value) in &device.identity {
        let _ = writeln!(out, "  {}: {}", key, value);
    }

    let primary = entry.primary().map(|ep| ep.control_url.as_str());
    for endpoint in device.endpoints.values() {
        let marker = if Some(endpoint.control_url.as_str()) == primary { " (primary)" } else { "" };
        let _ = writeln!(out, "  endpoint {}{}", endpoint.control_url, marker);
        endpoint_lines(&mut out, endpoint, show_media);
    }
    out
}

fn endpoint_lines(out: &mut String, endpoint: &Endpoint, show_media: bool) {
    let _ = writeln!(out, "    playable: {}", if endpoint.is_playable() { "yes" } else { "no" });
    let _ = writeln!(out, "    conn mgr: {}", or_dash(&endpoint.conn_mgr_url));

    let actions = endpoint.supported_actions();
    let _ = writeln!(out, "    actions ({}): {}", actions.len(), actions.join(", "));

    if endpoint.media.is_empty() {
        let _ = writeln!(out, "    media: unknown");
    } else {
        for (kind, subtypes) in group_media(&endpoint.media) {
            let _ = writeln!(out, "    media {} ({}): {}", kind, subtypes.len(), subtypes.join(", "));
        }
        if show_media {
            for (mime, profiles) in &endpoint.media {
                let _ = writeln!(out, "      {} [{}]", mime, profiles.join(", "));
            }
        }
    }

    let _ = writeln!(
        out,
        "    last seen: {}",
        endpoint.seen_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
    );
}

/// `video/mp4` and `video/mpeg` end up under `video` as `mp4, mpeg`
fn group_media(media: &MediaMap) -> BTreeMap<&str, Vec<&str>> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for mime in media.keys() {
        let (kind, subtype) = mime.split_once('/').unwrap_or((mime.as_str(), "*"));
        groups.entry(kind).or_default().push(subtype);
    }
    groups
}

pub fn resolution_line(resolution: &Resolution) -> String {
    format!(
        "{} via {}: {} (vendor: {}, conn mgr: {})",
        resolution.ip,
        resolution.source,
        resolution.control_url,
        if resolution.vendor.is_empty() { "generic" } else { resolution.vendor.as_str() },
        or_dash(&resolution.conn_mgr_url)
    )
}

pub fn detected_line(device: &DetectedDevice) -> String {
    let name = if device.identity.friendly_name.is_empty() {
        String::new()
    } else {
        format!(" \"{}\"", device.identity.friendly_name)
    };
    format!(
        "{}:{}{} vendor={} control={}",
        device.ip,
        device.port,
        name,
        or_dash(&device.vendor),
        device.control_url
    )
}

pub fn scan_summary(report: &ScanReport) -> String {
    let mut out = String::new();
    for resolution in &report.found {
        let _ = writeln!(out, "{}", resolution_line(resolution));
    }
    let _ = writeln!(
        out,
        "{}: {} renderer(s) in {}/{} hosts probed, {} timed out{}",
        report.cidr,
        report.found.len(),
        report.probed,
        report.hosts,
        report.timed_out,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderctl_core::{DeviceUpdate, ResolutionSource};

    fn update(control_url: &str, playable: bool) -> DeviceUpdate {
        let mut update = DeviceUpdate::for_endpoint(control_url);
        update.actions.insert("Play".to_string(), playable);
        update
    }

    fn sample_cache() -> DeviceCache {
        let mut cache = DeviceCache::new("/tmp/renderctl-render-test.json");

        let mut tv = update("http://10.0.0.5:9197/dmr", true);
        tv.vendor = "samsung".to_string();
        tv.conn_mgr_url = "http://10.0.0.5:9197/cm".to_string();
        tv.media.insert("video/mp4".to_string(), vec!["*".to_string()]);
        tv.media.insert("video/mpeg".to_string(), vec!["*".to_string()]);
        tv.media.insert("audio/mpeg".to_string(), vec!["*".to_string()]);
        cache.store_update("10.0.0.5", tv);
        cache.store_update("10.0.0.2", update("http://10.0.0.2:8080/avt", false));
        cache
    }

    #[test]
    fn test_cache_table_rows_in_index_order() {
        let table = cache_table(&sample_cache());
        let rows: Vec<&str> = table.lines().collect();

        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("0   10.0.0.2"));
        assert!(rows[1].contains("(no playable endpoint)"));
        assert!(rows[2].starts_with("1   10.0.0.5"));
        assert!(rows[2].contains("samsung"));
        assert!(rows[2].ends_with("http://10.0.0.5:9197/cm"));
    }

    #[test]
    fn test_empty_cache_table() {
        let cache = DeviceCache::new("/tmp/none.json");
        assert!(cache_table(&cache).starts_with("No cached devices"));
    }

    #[test]
    fn test_device_details_groups_media() {
        let cache = sample_cache();
        let entry = cache.find("10.0.0.5").unwrap();

        let details = device_details(&entry, false);
        assert!(details.contains("endpoint http://10.0.0.5:9197/dmr (primary)"));
        assert!(details.contains("playable: yes"));
        assert!(details.contains("actions (1): Play"));
        assert!(details.contains("media video (2): mp4, mpeg"));
        assert!(details.contains("media audio (1): mpeg"));
        assert!(!details.contains("video/mp4 [*]"));

        let expanded = device_details(&entry, true);
        assert!(expanded.contains("video/mp4 [*]"));
    }

    #[test]
    fn test_resolution_line() {
        let resolution = Resolution {
            ip: "10.0.0.5".to_string(),
            control_url: "http://10.0.0.5:9197/dmr".to_string(),
            conn_mgr_url: String::new(),
            vendor: String::new(),
            media: MediaMap::new(),
            source: ResolutionSource::Probe,
        };
        let line = resolution_line(&resolution);
        assert!(line.contains("vendor: generic"));
        assert!(line.contains("conn mgr: -"));
        assert!(line.contains(&resolution.source.to_string()));
    }

    #[test]
    fn test_scan_summary() {
        let report = ScanReport {
            cidr: "10.0.0.0/30".to_string(),
            hosts: 2,
            probed: 2,
            timed_out: 1,
            ..Default::default()
        };
        let summary = scan_summary(&report);
        assert!(summary.contains("0 renderer(s) in 2/2 hosts probed, 1 timed out"));
        assert!(!summary.contains("cancelled"));
    }
}
