//! PPDB intake bot: step-driven registration conversations over chat.

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intake;
pub mod routes;
pub mod storage;
pub mod store;
