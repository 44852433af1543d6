use std::fmt::Display;

/// Lifecycle of a broker connection (producer or consumer).
///
/// ```text
/// Created ──start──► Starting ──ok──► Running ──shutdown──► ShutDown
///                        └──err──► StartFailed ──shutdown──► ShutDown
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Starting,
    Running,
    StartFailed,
    ShutDown,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Created => "created",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::StartFailed => "start-failed",
            ServiceState::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}
