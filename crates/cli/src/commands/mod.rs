pub mod init;
pub mod serve;
pub mod tasks;
