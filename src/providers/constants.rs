//! Constants for provider interactions
//!
//! Route prefixes, upstream base URLs and the literal texts of canned error
//! bodies live here so provider implementations and tests share one copy.

/// Routing prefixes and upstream defaults
pub mod routes {
    pub const OPENAI_PREFIX: &str = "/openai/v1/";
    pub const OPENAI_STRIP: &str = "/openai";
    pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

    pub const REPLICATE_PREFIX: &str = "/replicate/v1/";
    pub const REPLICATE_STRIP: &str = "/replicate";
    pub const REPLICATE_BASE_URL: &str = "https://api.replicate.com";
}

/// Endpoint classes that may answer with an incrementally flushed body
pub mod streaming_endpoints {
    pub const OPENAI: [&str; 2] = ["/openai/v1/chat/completions", "/openai/v1/completions"];
    pub const REPLICATE: [&str; 1] = ["/replicate/v1/predictions"];
}

/// Authorization schemes
pub mod auth {
    pub const TOKEN_PREFIX: &str = "Token ";
    pub const BEARER_PREFIX: &str = "Bearer ";
}

/// JSON field names read from provider responses
pub mod json_fields {
    pub const OUTPUT: &str = "output";
    pub const STREAM: &str = "stream";
}

/// Image URL suffixes the replicate post-processor downloads
pub const IMAGE_EXTENSIONS: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// Error message texts
pub mod error_messages {
    pub const MISSING_AUTHORIZATION: &str = "missing Authorization header";
    pub const INVALID_REPLICATE_AUTHORIZATION: &str =
        "invalid Authorization format, expected 'Token <token>' or 'Bearer <token>'";

    pub mod openai {
        pub const ERROR_400: &str = "Your request was rejected as a result of our safety system. Please modify your request and try again.";
        pub const ERROR_500: &str = "The server had an error processing your request. Sorry about that! You can retry your request, or contact us through our help center at help.openai.com if you encounter this error repeatedly.";
        pub const CONTENT_SENSITIVE: &str = "Your request was rejected by the safety system. If you believe this is an error, contact us at help.openai.com and include the request ID req_f8c01da06be29e95a9293561d10b3a80. safety_violations=[sexual].";

        pub const TYPE_INVALID_REQUEST: &str = "invalid_request_error";
        pub const TYPE_SERVER_ERROR: &str = "server_error";
        pub const TYPE_IMAGE_GENERATION_USER_ERROR: &str = "image_generation_user_error";
        pub const CODE_MODERATION_BLOCKED: &str = "moderation_blocked";
    }

    pub mod replicate {
        pub const ERROR_400: &str = "Invalid request: request does not match the API specification";
        pub const ERROR_500: &str = "Internal server error";
        pub const CONTENT_SENSITIVE: &str = "The input or output was flagged as sensitive. Please try again with different inputs. (E005)";
    }

    pub mod generic {
        pub const ERROR_400: &str = "Bad request: the request was invalid or malformed";
        pub const ERROR_500: &str = "Internal server error: an error occurred while processing your request";
        pub const CONTENT_SENSITIVE: &str =
            "The request was flagged as sensitive and could not be processed";
    }
}
