//! Platform identification and normalization.
//!
//! Origins are canonicalized to `https://<domain>` strings so the
//! allowed-origin whitelist can be compared with simple equality, and each
//! platform gets a short prefix used in stored filenames.

/// Canonical origin for a content URL.
///
/// Known platforms map to fixed origins; anything else falls back to the
/// URL's own domain (with a leading `www.` stripped), or `"unknown"` when no
/// domain can be found.
#[must_use]
pub fn platform_for_url(url: &str) -> String {
    let url = url.to_ascii_lowercase();

    if url.contains("music.youtube.com") {
        return "https://music.youtube.com".to_string();
    }
    if url.contains("youtube.com") || url.contains("youtu.be") {
        return "https://youtube.com".to_string();
    }
    if url.contains("soundcloud.com") {
        return "https://soundcloud.com".to_string();
    }
    if url.contains("spotify.com") {
        return "https://spotify.com".to_string();
    }
    if url.contains("bandcamp.com") {
        return "https://bandcamp.com".to_string();
    }

    domain_of(&url).map_or_else(
        || "unknown".to_string(),
        |domain| format!("https://{domain}"),
    )
}

/// Short filename prefix for a canonical platform origin.
#[must_use]
pub fn platform_prefix(platform: &str) -> String {
    if platform.contains("music.youtube.com") {
        return "ytmusic".to_string();
    }
    if platform.contains("youtube.com") {
        return "youtube".to_string();
    }
    if platform.contains("soundcloud.com") {
        return "soundcloud".to_string();
    }
    if platform.contains("spotify.com") {
        return "spotify".to_string();
    }
    if platform.contains("bandcamp.com") {
        return "bandcamp".to_string();
    }

    domain_of(platform)
        .and_then(|domain| domain.split('.').next().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the extractor search expression for a platform.
///
/// Returns the search expression and the canonical origin it resolves to,
/// or `None` when the platform has no search backend. The expression
/// over-fetches (`limit * 2`) so live and radio entries can be filtered out
/// while still filling `limit` results.
#[must_use]
pub fn search_expression(platform: &str, query: &str, limit: usize) -> Option<(String, String)> {
    let fetch = limit.saturating_mul(2).max(1);
    match platform.to_ascii_lowercase().as_str() {
        "youtube" | "youtube.com" | "youtu.be" | "https://youtube.com" | "https://youtu.be" => {
            Some((
                format!("ytsearch{fetch}:{query}"),
                "https://youtube.com".to_string(),
            ))
        },
        "soundcloud" | "soundcloud.com" | "https://soundcloud.com" => Some((
            format!("scsearch{fetch}:{query}"),
            "https://soundcloud.com".to_string(),
        )),
        _ => None,
    }
}

fn domain_of(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let domain = rest.split('/').next()?;
    if domain.is_empty() {
        return None;
    }
    Some(domain.strip_prefix("www.").unwrap_or(domain).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_platforms() {
        assert_eq!(
            platform_for_url("https://www.youtube.com/watch?v=abc"),
            "https://youtube.com"
        );
        assert_eq!(
            platform_for_url("https://youtu.be/abc"),
            "https://youtube.com"
        );
        assert_eq!(
            platform_for_url("https://music.youtube.com/watch?v=abc"),
            "https://music.youtube.com"
        );
        assert_eq!(
            platform_for_url("https://soundcloud.com/artist/track"),
            "https://soundcloud.com"
        );
        assert_eq!(
            platform_for_url("https://bandcamp.com/track/x"),
            "https://bandcamp.com"
        );
    }

    #[test]
    fn test_unknown_platform_falls_back_to_domain() {
        assert_eq!(
            platform_for_url("https://www.example.org/media/1"),
            "https://example.org"
        );
        assert_eq!(platform_for_url("not a url"), "unknown");
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(platform_prefix("https://youtube.com"), "youtube");
        assert_eq!(platform_prefix("https://music.youtube.com"), "ytmusic");
        assert_eq!(platform_prefix("https://soundcloud.com"), "soundcloud");
        assert_eq!(platform_prefix("https://example.org"), "example");
    }

    #[test]
    fn test_search_expressions_over_fetch() {
        let (expr, origin) = search_expression("youtube", "lofi beats", 5).unwrap();
        assert_eq!(expr, "ytsearch10:lofi beats");
        assert_eq!(origin, "https://youtube.com");

        let (expr, origin) = search_expression("soundcloud", "mix", 3).unwrap();
        assert_eq!(expr, "scsearch6:mix");
        assert_eq!(origin, "https://soundcloud.com");

        assert!(search_expression("myspace", "anything", 5).is_none());
    }
}
