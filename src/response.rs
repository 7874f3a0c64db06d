//! Response mapping - operation outcomes to protocol status codes.
//!
//! [`map_outcome`] is a pure function from an [`Outcome`] to the status
//! code, body, and content-format option of the response frame. Client
//! errors and server errors carry a short diagnostic body as plain text.

use bytes::Bytes;

use crate::codec::Content;

/// Media type for diagnostic (error) bodies.
pub const MEDIA_TYPE_DIAGNOSTIC: &str = "text/plain";

/// Protocol response status, CoAP-style `class.detail` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 2.05 - read/invoke result with a body.
    Content,
    /// 2.04 - state changed, empty body.
    Changed,
    /// 4.00 - malformed payload, or a write to a read-only property.
    BadRequest,
    /// 4.04 - no such thing, affordance, or path shape.
    NotFound,
    /// 4.05 - method not applicable to the resource kind.
    MethodNotAllowed,
    /// 4.15 - content-format outside the supported set.
    UnsupportedMediaType,
    /// 5.00 - unhandled internal failure.
    InternalServerError,
    /// 5.01 - capability this protocol mapping cannot provide.
    NotImplemented,
}

impl Status {
    /// The `(class, detail)` pair of the code.
    pub fn code(&self) -> (u8, u8) {
        match self {
            Status::Content => (2, 5),
            Status::Changed => (2, 4),
            Status::BadRequest => (4, 0),
            Status::NotFound => (4, 4),
            Status::MethodNotAllowed => (4, 5),
            Status::UnsupportedMediaType => (4, 15),
            Status::InternalServerError => (5, 0),
            Status::NotImplemented => (5, 1),
        }
    }

    /// Success class (2.xx).
    pub fn is_success(&self) -> bool {
        self.code().0 == 2
    }

    /// Client error class (4.xx).
    pub fn is_client_error(&self) -> bool {
        self.code().0 == 4
    }

    /// Server error class (5.xx).
    pub fn is_server_error(&self) -> bool {
        self.code().0 == 5
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (class, detail) = self.code();
        write!(f, "{}.{:02}", class, detail)
    }
}

/// The result of routing one request, before status mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A read succeeded: property value, thing description, or listing.
    Read(Content),
    /// A property write succeeded.
    Written,
    /// An action invocation succeeded, with or without output.
    Invoked(Option<Content>),
    /// No thing, affordance, or path shape matched.
    NotFound(String),
    /// The method does not apply to the resource kind.
    MethodNotAllowed(String),
    /// Payload malformed or undeserializable, write to a read-only
    /// property, or a read of a write-only one.
    BadRequest(String),
    /// Content-format outside the supported set.
    UnsupportedMediaType(String),
    /// Unhandled internal failure.
    Internal(String),
    /// Capability not implementable by this protocol mapping.
    NotImplemented(String),
}

/// A mapped response ready to hand to the transport sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response status code.
    pub status: Status,
    /// Response body; empty for Changed.
    pub payload: Bytes,
    /// Content-format option, when a body is present.
    pub content_format: Option<String>,
}

impl Response {
    fn empty(status: Status) -> Self {
        Self {
            status,
            payload: Bytes::new(),
            content_format: None,
        }
    }

    fn diagnostic(status: Status, message: String) -> Self {
        Self {
            status,
            payload: Bytes::from(message),
            content_format: Some(MEDIA_TYPE_DIAGNOSTIC.to_string()),
        }
    }
}

/// Map an operation outcome to its response frame.
pub fn map_outcome(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Read(content) => Response {
            status: Status::Content,
            payload: content.body,
            content_format: Some(content.media_type),
        },
        Outcome::Written => Response::empty(Status::Changed),
        Outcome::Invoked(Some(content)) => Response {
            status: Status::Content,
            payload: content.body,
            content_format: Some(content.media_type),
        },
        Outcome::Invoked(None) => Response::empty(Status::Changed),
        Outcome::NotFound(msg) => Response::diagnostic(Status::NotFound, msg),
        Outcome::MethodNotAllowed(msg) => Response::diagnostic(Status::MethodNotAllowed, msg),
        Outcome::BadRequest(msg) => Response::diagnostic(Status::BadRequest, msg),
        Outcome::UnsupportedMediaType(msg) => {
            Response::diagnostic(Status::UnsupportedMediaType, msg)
        }
        Outcome::Internal(msg) => Response::diagnostic(Status::InternalServerError, msg),
        Outcome::NotImplemented(msg) => Response::diagnostic(Status::NotImplemented, msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(body: &'static [u8]) -> Content {
        Content::new("application/json", Bytes::from_static(body))
    }

    #[test]
    fn test_read_maps_to_content() {
        let resp = map_outcome(Outcome::Read(content(b"true")));
        assert_eq!(resp.status, Status::Content);
        assert_eq!(resp.payload, Bytes::from_static(b"true"));
        assert_eq!(resp.content_format.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_write_maps_to_changed_empty() {
        let resp = map_outcome(Outcome::Written);
        assert_eq!(resp.status, Status::Changed);
        assert!(resp.payload.is_empty());
        assert!(resp.content_format.is_none());
    }

    #[test]
    fn test_invoke_with_output_maps_to_content() {
        let resp = map_outcome(Outcome::Invoked(Some(content(b"3"))));
        assert_eq!(resp.status, Status::Content);
        assert_eq!(resp.payload, Bytes::from_static(b"3"));
    }

    #[test]
    fn test_invoke_without_output_maps_to_changed_empty() {
        let resp = map_outcome(Outcome::Invoked(None));
        assert_eq!(resp.status, Status::Changed);
        assert!(resp.payload.is_empty());
    }

    #[test]
    fn test_error_outcomes_carry_diagnostics() {
        let cases = [
            (Outcome::NotFound("x".into()), Status::NotFound),
            (Outcome::MethodNotAllowed("x".into()), Status::MethodNotAllowed),
            (Outcome::BadRequest("x".into()), Status::BadRequest),
            (
                Outcome::UnsupportedMediaType("x".into()),
                Status::UnsupportedMediaType,
            ),
            (Outcome::Internal("x".into()), Status::InternalServerError),
            (Outcome::NotImplemented("x".into()), Status::NotImplemented),
        ];

        for (outcome, status) in cases {
            let resp = map_outcome(outcome);
            assert_eq!(resp.status, status);
            assert_eq!(resp.payload, Bytes::from_static(b"x"));
            assert_eq!(resp.content_format.as_deref(), Some(MEDIA_TYPE_DIAGNOSTIC));
        }
    }

    #[test]
    fn test_status_classes() {
        assert!(Status::Content.is_success());
        assert!(Status::Changed.is_success());
        assert!(Status::BadRequest.is_client_error());
        assert!(Status::NotFound.is_client_error());
        assert!(Status::MethodNotAllowed.is_client_error());
        assert!(Status::UnsupportedMediaType.is_client_error());
        assert!(Status::InternalServerError.is_server_error());
        assert!(Status::NotImplemented.is_server_error());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Content.to_string(), "2.05");
        assert_eq!(Status::Changed.to_string(), "2.04");
        assert_eq!(Status::UnsupportedMediaType.to_string(), "4.15");
        assert_eq!(Status::NotImplemented.to_string(), "5.01");
    }
}
