use std::fmt;

/// Lifecycle of the single device link.
///
/// ```text
/// Disconnected ─► Scanning ─► Connecting ─► Discovering ─► Connected
///      ▲                                        ▲              │
///      │                         Restoring ─────┘              │
///      └───────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    /// Enumerating services and binding characteristics.
    Discovering,
    /// The OS restored a connection whose bindings are gone.
    Restoring,
    Connected,
}

impl ConnectionState {
    #[inline]
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Restoring => "restoring",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}
