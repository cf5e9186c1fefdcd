/// Maximum message text length in characters
pub const MAX_TEXT_LEN: usize = 4_000;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Header the upstream auth layer uses to hand us a verified identity
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";

/// Query parameter carrying the identity in the WebSocket handshake
pub const HANDSHAKE_IDENTITY_PARAM: &str = "userId";

/// WebSocket close codes
pub const CLOSE_INVALID_IDENTITY: u16 = 4002;
pub const CLOSE_SUPERSEDED: u16 = 4009;
