// API module
//
// HTTP surface over the ledger: submission, mining, balance and chain queries

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
