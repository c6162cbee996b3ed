//! Host and domain helpers
//!
//! The ads.txt and assetlinks stages need the registrable domain of a
//! developer website and wildcard-free assetlink hosts.

use url::Url;

/// Extracts the host from a URL string, lowercased
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Second-level suffixes under which a third label is needed for the
/// registrable domain (e.g. "example.co.uk"). Not a full public-suffix
/// list; covers the suffixes that show up in marketplace developer URLs.
const SECOND_LEVEL: &[&str] = &["co", "com", "net", "org", "gov", "edu", "ac", "or", "ne"];

/// Reduces a host to its registrable domain: public suffix plus one label
///
/// ```
/// use apkharvest::web::registrable_domain;
///
/// assert_eq!(registrable_domain("www.dev.example.com"), "example.com");
/// assert_eq!(registrable_domain("apps.example.co.uk"), "example.co.uk");
/// ```
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }

    let last = labels[labels.len() - 1];
    let second = labels[labels.len() - 2];

    // "co.uk"-style suffixes: ccTLD preceded by a known second-level label
    let take = if last.len() == 2 && SECOND_LEVEL.contains(&second) && labels.len() >= 3 {
        3
    } else {
        2
    };

    labels[labels.len() - take..].join(".")
}

/// Strips a leading wildcard label from an assetlink host
pub fn strip_wildcard(host: &str) -> &str {
    host.strip_prefix("*.").unwrap_or(host)
}

/// Derives the site root for ads.txt lookups from a developer website URL
///
/// The host is reduced to its registrable domain; scheme and explicit port
/// are kept. IP-literal hosts are kept as-is. None when the URL has no
/// host.
pub fn site_root(website_url: &str) -> Option<String> {
    let url = Url::parse(website_url).ok()?;
    let domain = match url.host()? {
        url::Host::Domain(host) => registrable_domain(&host.to_lowercase()),
        other => other.to_string(),
    };
    if domain.is_empty() {
        return None;
    }
    let mut root = format!("{}://{}", url.scheme(), domain);
    if let Some(port) = url.port() {
        root.push_str(&format!(":{}", port));
    }
    Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Dev.Example.COM/about"),
            Some("dev.example.com".to_string())
        );
        assert_eq!(extract_host("not a url"), None);
    }

    #[test]
    fn test_registrable_domain_simple() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.c.example.com"), "example.com");
    }

    #[test]
    fn test_registrable_domain_second_level() {
        assert_eq!(registrable_domain("example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("apps.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.com.au"), "example.com.au");
    }

    #[test]
    fn test_registrable_domain_bare() {
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_strip_wildcard() {
        assert_eq!(strip_wildcard("*.example.com"), "example.com");
        assert_eq!(strip_wildcard("example.com"), "example.com");
    }

    #[test]
    fn test_site_root() {
        assert_eq!(
            site_root("https://dev.blog.example.com/games/foo"),
            Some("https://example.com".to_string())
        );
        assert_eq!(site_root("::::"), None);
    }

    #[test]
    fn test_site_root_keeps_scheme_and_port() {
        assert_eq!(
            site_root("http://127.0.0.1:8080/about"),
            Some("http://127.0.0.1:8080".to_string())
        );
    }
}
