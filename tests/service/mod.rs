mod admission;
mod config;
