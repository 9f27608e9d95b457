pub mod config;
pub mod health;
pub mod serve;
pub mod synth;
pub mod token;
pub mod validate;
