pub mod config;
pub mod init;
pub mod run;
pub mod stages;
pub mod status;
pub mod tips;
