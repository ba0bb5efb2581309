pub mod client;
pub mod dispatcher;
pub mod hub;
pub mod registry;
pub mod types;
pub mod wire;
