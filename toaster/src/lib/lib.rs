pub mod config;
pub mod dag;
pub mod dfs;
pub mod errors;
pub mod exec;
pub mod fetch;
pub mod toast;
pub mod util;

#[cfg(test)]
pub mod test_support;
