use stagehand_core::coordinator::StatusHandle;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; handlers only ever read the coordinator status.
#[derive(Clone)]
pub struct AppState {
    /// Read-only view of the coordinator's state.
    pub status: StatusHandle,
}
