use crate::common::{Event, EventListener};
use crate::engine::VersionChangeEvent;
use crate::errors::BackboardError;

/// Events emitted by a [`Backboard`](crate::Backboard) connection manager.
#[derive(Debug, Clone)]
pub enum BackboardEvent {
    /// An open needs to upgrade `name` but other connections are still open.
    Blocked {
        name: String,
        event: VersionChangeEvent,
    },
    /// A commit on `database` ran out of storage quota.
    QuotaExceeded {
        database: String,
        error: BackboardError,
    },
    /// A pub/sub message on a subscribed channel.
    Message { channel: String, message: String },
    /// The manager was torn down by [`Backboard::end`](crate::Backboard::end).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackboardEventKind {
    Blocked,
    QuotaExceeded,
    Message,
    End,
}

impl Event for BackboardEvent {
    type Kind = BackboardEventKind;

    fn kind(&self) -> BackboardEventKind {
        match self {
            BackboardEvent::Blocked { .. } => BackboardEventKind::Blocked,
            BackboardEvent::QuotaExceeded { .. } => BackboardEventKind::QuotaExceeded,
            BackboardEvent::Message { .. } => BackboardEventKind::Message,
            BackboardEvent::End => BackboardEventKind::End,
        }
    }
}

/// Events emitted by a [`Database`](crate::database::Database) handle.
#[derive(Debug, Clone)]
pub enum DatabaseEvent {
    /// Another connection wants to upgrade or delete the database.
    VersionChange(VersionChangeEvent),
    /// The handle was closed, explicitly or by the engine.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseEventKind {
    VersionChange,
    Closed,
}

impl Event for DatabaseEvent {
    type Kind = DatabaseEventKind;

    fn kind(&self) -> DatabaseEventKind {
        match self {
            DatabaseEvent::VersionChange(_) => DatabaseEventKind::VersionChange,
            DatabaseEvent::Closed => DatabaseEventKind::Closed,
        }
    }
}

pub type BackboardEventListener = EventListener<BackboardEvent>;

pub type DatabaseEventListener = EventListener<DatabaseEvent>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn backboard_event_kinds() {
        let blocked = BackboardEvent::Blocked {
            name: "db".to_string(),
            event: VersionChangeEvent::new(1, Some(2)),
        };
        assert_eq!(blocked.kind(), BackboardEventKind::Blocked);

        let quota = BackboardEvent::QuotaExceeded {
            database: "db".to_string(),
            error: BackboardError::new("full", ErrorKind::QuotaExceededError),
        };
        assert_eq!(quota.kind(), BackboardEventKind::QuotaExceeded);
        assert_eq!(BackboardEvent::End.kind(), BackboardEventKind::End);
    }

    #[test]
    fn database_event_kinds() {
        let change = DatabaseEvent::VersionChange(VersionChangeEvent::new(1, None));
        assert_eq!(change.kind(), DatabaseEventKind::VersionChange);
        assert_eq!(DatabaseEvent::Closed.kind(), DatabaseEventKind::Closed);
    }
}
