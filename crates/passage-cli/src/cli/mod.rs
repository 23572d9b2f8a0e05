pub mod commands;
pub mod init;
