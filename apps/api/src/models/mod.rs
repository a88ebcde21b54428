pub mod cache;
pub mod job;
pub mod rate_limit;
