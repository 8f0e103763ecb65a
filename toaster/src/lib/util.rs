use std::time::Duration;

use uuid::Uuid;

/// Replaces URI characters that are unsafe in filenames. Long names are
/// truncated and prefixed with a digest so they stay unique.
pub fn sanitize(dirty: &str) -> String {
    let clean: String = dirty
        .chars()
        .map(|c| match c {
            '/' | '\\' | ';' | ':' | '?' | '=' => '_',
            other => other,
        })
        .collect();
    if clean.len() > 150 {
        let digest = uri_digest(dirty);
        let tail: String = clean.chars().skip(clean.chars().count() - 114).collect();
        format!("{digest}{tail}")
    } else {
        clean
    }
}

fn uri_digest(uri: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, uri.as_bytes())
        .simple()
        .to_string()
}

/// Destination filename for a downloaded source URI: a deterministic digest
/// plus the sanitized URI. The `.gz` extension is dropped when the file will
/// be decompressed on the way in.
pub fn dest_filename(source_uri: &str, decompress: bool) -> String {
    let mut filename = format!("{}.{}", uri_digest(source_uri), sanitize(source_uri));
    if decompress {
        if let Some(stripped) = filename.strip_suffix(".gz") {
            filename = stripped.to_string();
        }
    }
    filename
}

/// Backoff used when polling long-running external operations: short sleeps
/// at first, then progressively longer ones based on total elapsed time.
pub fn progressive_delay(elapsed: Duration) -> Duration {
    let secs = elapsed.as_secs();
    if secs < 30 {
        Duration::from_secs(5)
    } else if secs < 60 {
        Duration::from_secs(10)
    } else if secs < 200 {
        Duration::from_secs(20)
    } else {
        Duration::from_secs(secs / 10)
    }
}

/// Joins URL/path segments with a single slash, the way the DFS layout
/// expects. Does not touch the scheme part.
pub fn join_url(base: &str, segment: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), segment.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_uri_chars() {
        assert_eq!(
            sanitize("http://example.com/a?b=c"),
            "http___example.com_a_b_c"
        );
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = format!("http://example.com/{}", "x".repeat(400));
        let clean = sanitize(&long);
        assert_eq!(clean.chars().count(), 32 + 114);
    }

    #[test]
    fn dest_filename_is_deterministic() {
        let a = dest_filename("http://example/dbsnp.vcf.gz", false);
        let b = dest_filename("http://example/dbsnp.vcf.gz", false);
        assert_eq!(a, b);
        assert!(a.ends_with(".gz"));
    }

    #[test]
    fn dest_filename_drops_gz_when_decompressing() {
        let name = dest_filename("http://example/dbsnp.vcf.gz", true);
        assert!(name.ends_with(".vcf"));
    }

    #[test]
    fn progressive_delay_bands() {
        assert_eq!(progressive_delay(Duration::from_secs(0)), Duration::from_secs(5));
        assert_eq!(progressive_delay(Duration::from_secs(45)), Duration::from_secs(10));
        assert_eq!(progressive_delay(Duration::from_secs(100)), Duration::from_secs(20));
        assert_eq!(progressive_delay(Duration::from_secs(500)), Duration::from_secs(50));
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("hdfs://nn/data/", "/dbsnp"), "hdfs://nn/data/dbsnp");
        assert_eq!(join_url("file:///tmp", "raw"), "file:///tmp/raw");
    }
}
