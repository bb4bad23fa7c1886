pub mod events;
pub mod history;
pub mod hub;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transcript;
