//! Minimal multipart MIME body splitting for `multipart/mixed` and
//! `multipart/alternative` SIP bodies (file-transfer INVITEs, proxy
//! fallback).

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub struct MimePart<'a> {
    pub headers: Vec<(String, String)>,
    pub body: &'a str,
}

impl MimePart<'_> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}

/// Extract the `boundary` parameter from a Content-Type header value.
fn boundary(content_type: &str) -> Option<&str> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            return Some(value.trim_matches('"'));
        }
    }
    None
}

/// Split a multipart body into its parts. Returns an empty list when the
/// Content-Type carries no boundary or no part delimiter matches.
pub fn parts<'a>(content_type: &str, body: &'a str) -> Vec<MimePart<'a>> {
    let Some(boundary) = boundary(content_type) else {
        return Vec::new();
    };
    let delimiter = format!("--{}", boundary);

    let mut result = Vec::new();
    for raw in body.split(delimiter.as_str()).skip(1) {
        // The closing delimiter leaves "--" (plus trailing CRLF) behind.
        if raw.starts_with("--") {
            break;
        }
        let raw = raw.strip_prefix("\r\n").unwrap_or(raw);

        let (header_block, part_body) = match raw.split_once("\r\n\r\n") {
            Some(split) => split,
            None => ("", raw),
        };

        let mut headers = Vec::new();
        for line in header_block.lines() {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let part_body = part_body.strip_suffix("\r\n").unwrap_or(part_body);
        result.push(MimePart {
            headers,
            body: part_body,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----=_NextPart_000_001E_01CB4397.0B5EB570";

    #[test]
    fn test_split_two_parts() {
        let content_type = format!("multipart/mixed;boundary=\"{}\"", BOUNDARY);
        let body = format!(
            "--{b}\r\n\
             Content-Type: application/ms-filetransfer+xml\r\n\
             \r\n\
             <request/>\r\n\
             --{b}\r\n\
             Content-Type: application/sdp\r\n\
             Content-Disposition: session; handling=optional\r\n\
             \r\n\
             v=0\r\n\
             s=session\r\n\
             --{b}--\r\n",
            b = BOUNDARY
        );

        let parts = parts(&content_type, &body);
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[0].content_type(),
            Some("application/ms-filetransfer+xml")
        );
        assert_eq!(parts[0].body, "<request/>");
        assert_eq!(parts[1].content_type(), Some("application/sdp"));
        assert!(parts[1].body.starts_with("v=0"));
        assert!(parts[1].body.ends_with("s=session"));
    }

    #[test]
    fn test_no_boundary_yields_nothing() {
        assert!(parts("multipart/mixed", "--x\r\n\r\nbody\r\n--x--").is_empty());
    }
}
