pub mod app;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod errors;
pub mod manager;
pub mod overrides;
pub mod paths;
pub mod provider;
pub mod store;
#[cfg(test)]
pub mod test_support;
