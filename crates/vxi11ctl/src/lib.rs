pub mod cmd_discover;
pub mod cmd_io;
pub mod cmd_listeners;
pub mod cmd_ops;
pub mod common;
