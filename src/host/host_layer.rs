// The host module is the seam between the core and the game-server process:
// the async execution boundary and the lifecycle facade.

#[path = "api.rs"]
pub mod api;

#[path = "dispatcher.rs"]
pub mod dispatcher;
