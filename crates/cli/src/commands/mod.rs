pub mod config_cmd;
pub mod eval;
pub mod keys;
