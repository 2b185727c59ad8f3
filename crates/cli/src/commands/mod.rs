pub mod config_cmd;
pub mod fix;
pub mod tools;
