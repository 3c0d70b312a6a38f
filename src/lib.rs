//! # Field Datalogger Library
//!
//! Controller for an unattended environmental data logger.
//!
//! The logger samples its sensors once a second into daily CSV files and,
//! once a day, powers up a cellular modem to ship the finished files to a
//! remote server over sftp.

pub mod config;
pub mod error;
pub mod link;
pub mod modem;
pub mod position;
pub mod scheduler;
pub mod sensors;
pub mod storage;
pub mod upload;
