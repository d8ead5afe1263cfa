pub mod auth;
pub mod billing;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod session_driver;
pub mod state;
pub mod ws_handler;

// Re-export the router builder to make it easily accessible
// to the binary that will build the web server.
pub use router::app_router;
pub use middleware::require_auth;
