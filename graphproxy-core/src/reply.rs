/// An HTTP response as the handlers see it: a status line (without the
/// protocol version), header pairs, and a body.
///
/// Cached upstream responses and locally generated rejections share this
/// shape; the connection layer serializes it onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status line, e.g. `200 OK`
    pub status: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn new(
        status: impl Into<String>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            status: status.into(),
            headers,
            body,
        }
    }

    fn text(status: &str, body: &str) -> Self {
        Self {
            status: status.to_string(),
            headers: vec![("Content-type".to_string(), "text/plain".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn ok_text(message: &str) -> Self {
        Self::text("200 OK", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::text("400 Bad Request", message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::text("403 Forbidden", message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::text("404 Not Found", message)
    }

    pub fn internal_error() -> Self {
        Self::text("500 Internal Server Error", "An internal error occurred\n")
    }

    /// Numeric status code parsed from the status line (0 when malformed).
    pub fn status_code(&self) -> u16 {
        self.status
            .split_whitespace()
            .next()
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }
}
