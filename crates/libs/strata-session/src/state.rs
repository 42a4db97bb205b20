use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::discriminant;
use strata_topics::SessionError;

/// Connection state of a session.
///
/// The error carried by `ClosedFailed` is informational and does not take
/// part in equality.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    ConnectedActive,
    RecoveringReconnect,
    ClosedByClient,
    ClosedByServer,
    ClosedFailed(SessionError),
}

impl PartialEq for SessionState {
    fn eq(&self, other: &Self) -> bool {
        discriminant(self) == discriminant(other)
    }
}

impl Eq for SessionState {}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::ConnectedActive)
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Self::RecoveringReconnect)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ClosedByClient | Self::ClosedByServer | Self::ClosedFailed(_))
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            Self::ClosedFailed(error) => Some(error),
            _ => None,
        }
    }

    /// Closed states are terminal; recovery only starts from an active
    /// connection.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        match (self, next) {
            (current, _) if current.is_closed() => false,
            (_, next) if next.is_closed() => true,
            (Self::Connecting, Self::ConnectedActive) => true,
            (Self::ConnectedActive, Self::RecoveringReconnect) => true,
            (Self::RecoveringReconnect, Self::ConnectedActive) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::ConnectedActive => "connected_active",
            Self::RecoveringReconnect => "recovering_reconnect",
            Self::ClosedByClient => "closed_by_client",
            Self::ClosedByServer => "closed_by_server",
            Self::ClosedFailed(_) => "closed_failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedFailed(error) => write!(f, "closed_failed ({error})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStateChange {
    pub previous: SessionState,
    pub current: SessionState,
}

/// Why a session ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    ClosedByClient,
    ClosedByServer,
    Failed(SessionError),
}

impl CloseReason {
    pub fn into_state(self) -> SessionState {
        match self {
            Self::ClosedByClient => SessionState::ClosedByClient,
            Self::ClosedByServer => SessionState::ClosedByServer,
            Self::Failed(error) => SessionState::ClosedFailed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_failed_equality_ignores_error() {
        assert_eq!(
            SessionState::ClosedFailed(SessionError::Disconnected),
            SessionState::ClosedFailed(SessionError::SessionClosed)
        );
        assert_ne!(SessionState::ClosedByClient, SessionState::ClosedByServer);
    }

    #[test]
    fn legal_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(&ConnectedActive));
        assert!(ConnectedActive.can_transition_to(&RecoveringReconnect));
        assert!(RecoveringReconnect.can_transition_to(&ConnectedActive));
        assert!(RecoveringReconnect.can_transition_to(&ClosedFailed(SessionError::Disconnected)));
        assert!(!Connecting.can_transition_to(&RecoveringReconnect));
        assert!(!ClosedByClient.can_transition_to(&ConnectedActive));
        assert!(!ClosedByServer.can_transition_to(&ClosedByClient));
    }
}
