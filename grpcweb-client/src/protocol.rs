//! Wire protocol selection: native gRPC vs the two gRPC-Web variants.

/// The transport-level protocol a client speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// Native gRPC over HTTP/2. Trailers travel as HTTP trailer fields.
    #[default]
    Grpc,
    /// gRPC-Web with a binary body. Trailers travel in a trailer frame.
    GrpcWeb,
    /// gRPC-Web with the whole body base64-encoded.
    GrpcWebText,
}

impl Protocol {
    /// The content-type sent on requests.
    pub fn content_type(&self) -> &'static str {
        match self {
            Protocol::Grpc => "application/grpc",
            Protocol::GrpcWeb => "application/grpc-web+proto",
            Protocol::GrpcWebText => "application/grpc-web-text+proto",
        }
    }

    /// The content-type family accepted on responses.
    fn accepted_prefix(&self) -> &'static str {
        match self {
            Protocol::Grpc => "application/grpc",
            // Web servers may answer text requests with either web
            // variant; both start with this prefix.
            Protocol::GrpcWeb | Protocol::GrpcWebText => "application/grpc-web",
        }
    }

    /// Validate a response content-type against this protocol.
    ///
    /// `application/grpc` also accepts the web variants' prefix since
    /// `application/grpc-web` starts with it, mirroring the family rule.
    pub fn accepts(&self, content_type: &str) -> bool {
        let prefix = self.accepted_prefix();
        content_type.len() >= prefix.len()
            && content_type[..prefix.len()].eq_ignore_ascii_case(prefix)
    }

    /// Whether trailers arrive inside the body as a trailer frame.
    pub fn is_web(&self) -> bool {
        !matches!(self, Protocol::Grpc)
    }

    /// Whether the body is base64-encoded on the wire.
    pub fn is_text(&self) -> bool {
        matches!(self, Protocol::GrpcWebText)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(Protocol::Grpc.content_type(), "application/grpc");
        assert_eq!(Protocol::GrpcWeb.content_type(), "application/grpc-web+proto");
        assert_eq!(
            Protocol::GrpcWebText.content_type(),
            "application/grpc-web-text+proto"
        );
    }

    #[test]
    fn test_accepts_family() {
        assert!(Protocol::Grpc.accepts("application/grpc"));
        assert!(Protocol::Grpc.accepts("application/grpc+proto"));
        assert!(Protocol::GrpcWeb.accepts("application/grpc-web+proto"));
        assert!(Protocol::GrpcWebText.accepts("application/grpc-web-text+proto"));
        assert!(Protocol::GrpcWeb.accepts("APPLICATION/GRPC-WEB"));
    }

    #[test]
    fn test_rejects_foreign_types() {
        assert!(!Protocol::Grpc.accepts("text/html"));
        assert!(!Protocol::GrpcWeb.accepts("application/grpc"));
        assert!(!Protocol::GrpcWeb.accepts("application/json"));
    }

    #[test]
    fn test_mode_flags() {
        assert!(!Protocol::Grpc.is_web());
        assert!(Protocol::GrpcWeb.is_web());
        assert!(Protocol::GrpcWebText.is_web());
        assert!(!Protocol::GrpcWeb.is_text());
        assert!(Protocol::GrpcWebText.is_text());
    }
}
