pub mod core;
pub mod courses;
pub mod extensions;
pub mod merges;
pub mod registrations;
pub mod schedule;
pub mod setup;
