pub mod broker;
pub mod mail;
