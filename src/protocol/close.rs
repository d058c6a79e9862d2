//! WebSocket close codes.
//!
//! Transparent wrapper over the RFC 6455 status code space, used when
//! requesting a disconnect and when reporting how a connection ended.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// CloseCode
// ============================================================================

/// A WebSocket close status code.
///
/// Unknown and registry-assigned codes are carried verbatim; named constants
/// cover the codes this crate acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(u16);

impl CloseCode {
    /// Normal closure; the purpose of the connection has been fulfilled.
    pub const NORMAL: Self = Self(1000);

    /// The endpoint is going away (shutdown, navigation, teardown).
    pub const GOING_AWAY: Self = Self(1001);

    /// A protocol error terminated the connection.
    pub const PROTOCOL_ERROR: Self = Self(1002);

    /// The endpoint received a data type it cannot accept.
    pub const UNSUPPORTED: Self = Self(1003);

    /// No status code was present in the close frame.
    pub const NO_STATUS: Self = Self(1005);

    /// The connection dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);

    /// A message violated the endpoint's policy.
    pub const POLICY_VIOLATION: Self = Self(1008);

    /// A message was too large to process.
    pub const MESSAGE_TOO_BIG: Self = Self(1009);

    /// The server encountered an unexpected condition.
    pub const INTERNAL_ERROR: Self = Self(1011);

    /// Creates a close code from its numeric value.
    #[inline]
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric value of this close code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

// ============================================================================
// Predicates
// ============================================================================

impl CloseCode {
    /// Returns `true` for a normal or going-away closure.
    #[inline]
    #[must_use]
    pub const fn is_normal(self) -> bool {
        self.0 == 1000 || self.0 == 1001
    }

    /// Returns `true` for the abnormal-closure code (1006).
    #[inline]
    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        self.0 == 1006
    }

    /// Returns `true` if the code may be sent in a close frame.
    ///
    /// 1005, 1006, and 1015 are reserved for reporting only and must never
    /// appear on the wire.
    #[inline]
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        !matches!(self.0, 1005 | 1006 | 1015) && self.0 >= 1000
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<u16> for CloseCode {
    #[inline]
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<CloseCode> for u16 {
    #[inline]
    fn from(code: CloseCode) -> Self {
        code.0
    }
}

impl Default for CloseCode {
    /// Defaults to [`CloseCode::NORMAL`].
    #[inline]
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
