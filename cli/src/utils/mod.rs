pub mod config_source;
