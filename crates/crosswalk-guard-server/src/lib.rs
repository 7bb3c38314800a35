//! Service shell for the crosswalk-guard engine: WebSocket gateway,
//! session hub, and the external-collaborator boundaries (image
//! classifier, capture archive).

pub mod classify;
pub mod dto;
pub mod gateway;
pub mod handlers;
pub mod hub;
pub mod media;

pub use handlers::AppState;
pub use hub::SessionHub;
