//! Topic Press: an email-driven article generator for a static site.

pub mod batch;
pub mod catalog;
pub mod channels;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod publish;
pub mod site;
