pub mod auth;
pub mod classifier;
pub mod gateway_client;
pub mod probe;
pub mod queue;
pub mod worker;
