mod app;
mod status;

pub use app::{app, AppState};
pub use status::{HealthResponse, ReadyResponse};
