//! Outbound HTTP/1.1 request text.

/// Builds the minimal GET request.
///
/// This is the exact wire format the drivers put on the socket:
///
/// ```text
/// GET <path> HTTP/1.1\r\n
/// Host: <hostname>\r\n
/// Content-Length: 0\r\n\r\n
/// ```
pub fn minimal(hostname: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Length: 0\r\n\r\n",
        path, hostname
    )
}

/// Builds a GET request carrying a fixed browser-like header block.
///
/// Some servers answer the bare [`minimal`] request with a 400 or an
/// immediate close; this variant gets past those. The header set is fixed,
/// selection between the two happens through
/// [`BatchConfig::browser_headers`](crate::BatchConfig).
pub fn browser_like(hostname: &str, path: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/70.0.3538.102 Safari/537.36\r\n\
         Accept: text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8\r\n\
         Accept-Language: en-US,en;q=0.9,ro;q=0.8\r\n\
         Accept-Encoding: identity\r\n\
         Connection: keep-alive\r\n\
         Upgrade-Insecure-Requests: 1\r\n\
         Pragma: no-cache\r\n\
         Cache-Control: no-cache\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: 0\r\n\r\n",
        path, hostname
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_matches_wire_format() {
        assert_eq!(
            minimal("www.cs.ubbcluj.ro", "/~forest"),
            "GET /~forest HTTP/1.1\r\n\
             Host: www.cs.ubbcluj.ro\r\n\
             Content-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn browser_like_carries_the_fixed_header_block() {
        let req = browser_like("example.com", "/");
        assert!(req.starts_with("GET / HTTP/1.1\r\nHost: example.com\r\n"));
        for header in &[
            "User-Agent:",
            "Accept:",
            "Accept-Language:",
            "Accept-Encoding:",
            "Connection:",
            "Upgrade-Insecure-Requests:",
            "Pragma:",
            "Cache-Control:",
            "Content-Type:",
        ] {
            assert!(req.contains(header), "missing {}", header);
        }
        assert!(req.ends_with("Content-Length: 0\r\n\r\n"));
    }
}
