//! Site normalization: reduce a feedback URL to the logical site it belongs to.

/// Strip path, query, fragment, user-info and a leading `www.` from `url`, keeping the
/// scheme, the remaining host and any port.
///
/// ```
/// use sitecluster::normalize_url;
/// assert_eq!(normalize_url("http://www.google.com:8080/test"), "http://google.com:8080");
/// assert_eq!(normalize_url("about:config"), "about:config");
/// ```
pub fn normalize_url(url: &str) -> String {
    // about:, data: and friends are left alone.
    if !url.contains('/') {
        return url.to_string();
    }
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let (scheme, rest) = url.split_at(scheme_end);
    let host_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let mut host = &rest[..host_end];
    if let Some(at) = host.rfind('@') {
        host = &host[at + 1..];
    }
    let host = host.strip_prefix("www.").unwrap_or(host);
    format!("{scheme}{host}")
}
