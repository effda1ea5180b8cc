//! Last-write-wins conflict resolution.

use chrono::{DateTime, Utc};

/// Which side of a local/server pair should win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    TakeServer,
}

/// Compares a local modification time with the server's update time.
///
/// The server wins only when strictly newer; ties keep the local copy.
pub fn resolve(local_modified: DateTime<Utc>, server_updated: DateTime<Utc>) -> Resolution {
    if server_updated > local_modified {
        Resolution::TakeServer
    } else {
        Resolution::KeepLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_newer_server_wins() {
        let local = Utc::now();
        assert_eq!(
            resolve(local, local + Duration::seconds(1)),
            Resolution::TakeServer
        );
    }

    #[test]
    fn test_newer_local_wins() {
        let server = Utc::now();
        assert_eq!(
            resolve(server + Duration::milliseconds(1), server),
            Resolution::KeepLocal
        );
    }

    #[test]
    fn test_tie_keeps_local() {
        let ts = Utc::now();
        assert_eq!(resolve(ts, ts), Resolution::KeepLocal);
    }
}
