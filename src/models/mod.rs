pub mod job;
pub mod token;
pub mod verification;
