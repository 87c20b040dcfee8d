pub mod config;
pub mod crypt;
pub mod demo;
pub mod secret;
