//! Syscall names spoken on the board websocket.

/// Server → client, once per connection. `data.client_id` names the socket.
pub const SESSION_CONNECTED: &str = "session:connected";

/// Client → server: subscribe to a board's paint stream. Done carries
/// `online`.
pub const BOARD_JOIN: &str = "board:join";

/// Client → server: unsubscribe.
pub const BOARD_PART: &str = "board:part";

/// Server → every subscriber whenever the subscriber count changes.
pub const BOARD_PRESENCE: &str = "board:presence";

/// Client → server: publish one paint. Also the push peers receive.
pub const PAINT_PUT: &str = "paint:put";

/// Server → client: a frame the gateway could not route or decode.
pub const GATEWAY_ERROR: &str = "gateway:error";

/// Prefix for board membership syscalls.
pub const PREFIX_BOARD: &str = "board";

/// Prefix for paint syscalls.
pub const PREFIX_PAINT: &str = "paint";
