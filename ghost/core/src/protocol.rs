//! SHIORI 3.0 Wire Codec
//!
//! Parses inbound requests (header lines terminated by a blank line) and
//! serializes outbound responses with byte-exact CRLF framing. The front-end
//! parses our output with the same framing rules, so `encode` never varies
//! its layout.
//!
//! The codec is pure: no state, no side effects.

use std::fmt;

use thiserror::Error;

/// Header name that carries the event identifier.
pub const ID_HEADER: &str = "ID";

/// Errors produced while decoding a request frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// A header line had no `:` separator.
    #[error("malformed header at line {line_no}: {line:?}")]
    MalformedHeader {
        /// 1-based line number within the frame
        line_no: usize,
        /// The offending line
        line: String,
    },

    /// The frame had no `ID` header.
    #[error("request frame is missing the ID header")]
    MissingId,

    /// End of input before the blank-line terminator.
    #[error("incomplete frame: no blank-line terminator before end of input")]
    IncompleteFrame,
}

/// A decoded SHIORI request: an ordered header map plus the event identifier.
///
/// Duplicate headers keep last-wins semantics on lookup while the original
/// order is preserved for iteration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    headers: Vec<(String, String)>,
}

impl Request {
    /// Build a request directly from an event identifier (used for synthetic
    /// events; the ticker and choice resolution go through this).
    #[must_use]
    pub fn synthetic(event_id: &str) -> Self {
        let mut req = Self::default();
        req.push_header(ID_HEADER, event_id);
        req
    }

    /// Append a header, preserving arrival order.
    pub fn push_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Builder-style header append for synthetic requests.
    #[must_use]
    pub fn with_reference(mut self, index: usize, value: &str) -> Self {
        self.push_header(&format!("Reference{index}"), value);
        self
    }

    /// Look up a header value. Last occurrence wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The event identifier from the `ID` header.
    ///
    /// Decoded requests always have one; synthetic construction enforces it.
    #[must_use]
    pub fn event_id(&self) -> &str {
        self.header(ID_HEADER).unwrap_or_default()
    }

    /// `ReferenceN` accessor.
    #[must_use]
    pub fn reference(&self, index: usize) -> Option<&str> {
        self.header(&format!("Reference{index}"))
    }

    /// All headers in arrival order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Decode a request frame.
    ///
    /// Reads header lines until a blank line. CRLF is canonical; bare LF is
    /// tolerated on input (the reference front-ends trim `\r` the same way).
    /// A leading `GET ... SHIORI/x.x` request line, sent by some baseware,
    /// is skipped rather than rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, ParseError> {
        let text = String::from_utf8_lossy(bytes);
        let mut req = Request::default();
        let mut terminated = false;

        let mut lines = text.split('\n').enumerate().peekable();
        while let Some((idx, raw)) = lines.next() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if line.is_empty() {
                // `split` yields a trailing fragment after the final newline;
                // only an empty line *inside* the stream is the terminator.
                terminated = lines.peek().is_some();
                break;
            }

            if idx == 0 && line.contains("SHIORI/") && !line.contains(':') {
                continue;
            }

            let Some(colon) = line.find(':') else {
                return Err(ParseError::MalformedHeader {
                    line_no: idx + 1,
                    line: line.to_string(),
                });
            };

            let name = line[..colon].trim();
            let value = line[colon + 1..].trim();
            req.push_header(name, value);
        }

        if !terminated {
            return Err(ParseError::IncompleteFrame);
        }
        if req.header(ID_HEADER).is_none() {
            return Err(ParseError::MissingId);
        }

        Ok(req)
    }
}

/// Response status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// 200: success with content
    Ok,
    /// 204: success, nothing to say
    NoContent,
    /// 400: the request frame or its references were malformed
    BadRequest,
    /// 500: a handler failed internally
    InternalServerError,
}

impl Status {
    /// Numeric code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::NoContent => 204,
            Self::BadRequest => 400,
            Self::InternalServerError => 500,
        }
    }

    /// Reason phrase as it appears on the wire.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NoContent => "No Content",
            Self::BadRequest => "Bad Request",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    /// Whether this is a success code.
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::NoContent)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// An outbound SHIORI response.
///
/// `value` is present iff the status is a success code that carries content;
/// the constructors enforce this, diagnostics for error statuses travel in an
/// extra header instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,
    /// Script text payload
    pub value: Option<String>,
    /// Extra headers, emitted after Content-Type in order
    pub extra_headers: Vec<(String, String)>,
}

impl Response {
    /// 200 with a script payload.
    #[must_use]
    pub fn ok(value: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            value: Some(value.into()),
            extra_headers: Vec::new(),
        }
    }

    /// 204, the no-op success every unknown event receives.
    #[must_use]
    pub fn no_content() -> Self {
        Self {
            status: Status::NoContent,
            value: None,
            extra_headers: Vec::new(),
        }
    }

    /// 400 with a diagnostic header.
    #[must_use]
    pub fn bad_request(diagnostic: impl Into<String>) -> Self {
        Self {
            status: Status::BadRequest,
            value: None,
            extra_headers: vec![("X-Ghost-Error".to_string(), diagnostic.into())],
        }
    }

    /// 500 with a diagnostic header.
    #[must_use]
    pub fn internal_error(diagnostic: impl Into<String>) -> Self {
        Self {
            status: Status::InternalServerError,
            value: None,
            extra_headers: vec![("X-Ghost-Error".to_string(), diagnostic.into())],
        }
    }

    /// Attach an extra header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Serialize to the wire framing.
    ///
    /// Status line, `Charset`, `Content-Type`, extra headers, `Value` (if
    /// any), then the blank-line terminator. All lines CRLF.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("SHIORI/3.0 {}\r\n", self.status));
        out.push_str("Charset: UTF-8\r\n");
        out.push_str("Content-Type: text/plain\r\n");
        for (name, value) in &self.extra_headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(ref value) = self.value {
            out.push_str(&format!("Value: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_minimal_request() {
        let req = Request::decode(b"ID: OnBoot\r\n\r\n").unwrap();
        assert_eq!(req.event_id(), "OnBoot");
    }

    #[test]
    fn test_decode_references() {
        let req = Request::decode(
            b"ID: OnMouseClick\r\nReference0: 0\r\nReference1: 12,34\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.reference(0), Some("0"));
        assert_eq!(req.reference(1), Some("12,34"));
        assert_eq!(req.reference(2), None);
    }

    #[test]
    fn test_decode_duplicate_header_last_wins() {
        let req = Request::decode(b"ID: OnBoot\r\nID: OnClose\r\n\r\n").unwrap();
        assert_eq!(req.event_id(), "OnClose");
        // Order is still preserved for iteration
        assert_eq!(req.headers().len(), 2);
    }

    #[test]
    fn test_decode_tolerates_request_line() {
        let req = Request::decode(b"GET SHIORI/3.0\r\nID: OnBoot\r\n\r\n").unwrap();
        assert_eq!(req.event_id(), "OnBoot");
    }

    #[test]
    fn test_decode_tolerates_bare_lf() {
        let req = Request::decode(b"ID: OnSecondChange\n\n").unwrap();
        assert_eq!(req.event_id(), "OnSecondChange");
    }

    #[test]
    fn test_decode_malformed_header() {
        let err = Request::decode(b"ID: OnBoot\r\nnot a header\r\n\r\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::MalformedHeader {
                line_no: 2,
                line: "not a header".to_string(),
            }
        );
    }

    #[test]
    fn test_decode_missing_id() {
        let err = Request::decode(b"Reference0: 1\r\n\r\n").unwrap_err();
        assert_eq!(err, ParseError::MissingId);
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let err = Request::decode(b"ID: OnBoot\r\n").unwrap_err();
        assert_eq!(err, ParseError::IncompleteFrame);
    }

    #[test]
    fn test_decode_newline_terminated_headers_are_not_a_frame() {
        // Lines ending in a single newline are complete headers, not a
        // complete frame; only a blank line terminates.
        let err = Request::decode(b"ID: OnBoot\r\nReference0: 1\r\n").unwrap_err();
        assert_eq!(err, ParseError::IncompleteFrame);
        let err = Request::decode(b"ID: OnBoot\n").unwrap_err();
        assert_eq!(err, ParseError::IncompleteFrame);
        let err = Request::decode(b"ID: OnBoot").unwrap_err();
        assert_eq!(err, ParseError::IncompleteFrame);
    }

    #[test]
    fn test_encode_ok_byte_exact() {
        let resp = Response::ok("\\h\\s[0]Hello.\\e");
        assert_eq!(
            resp.encode(),
            b"SHIORI/3.0 200 OK\r\nCharset: UTF-8\r\nContent-Type: text/plain\r\nValue: \\h\\s[0]Hello.\\e\r\n\r\n"
        );
    }

    #[test]
    fn test_encode_no_content_has_no_value() {
        let bytes = Response::no_content().encode();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("SHIORI/3.0 204 No Content\r\n"));
        assert!(!text.contains("Value:"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_encode_error_carries_diagnostic_header() {
        let bytes = Response::bad_request("malformed header at line 2").encode();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("X-Ghost-Error: malformed header at line 2\r\n"));
        assert!(!text.contains("Value:"));
    }

    #[test]
    fn test_header_values_round_trip_exactly() {
        // Header values with script escapes must survive decode untouched.
        let value = "\\h\\s[5]100% \\\\done\\e";
        let frame = format!("ID: OnBoot\r\nReference0: {value}\r\n\r\n");
        let req = Request::decode(frame.as_bytes()).unwrap();
        assert_eq!(req.reference(0), Some(value));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Ok.to_string(), "200 OK");
        assert_eq!(Status::NoContent.to_string(), "204 No Content");
        assert!(Status::NoContent.is_success());
        assert!(!Status::BadRequest.is_success());
    }
}
