pub mod analyzer;
pub mod bootstrap;
pub mod commands;
pub mod extracted;
pub mod resolver;
