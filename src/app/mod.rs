//! Application module

pub mod cli;
pub mod seed;
pub mod startup;

#[cfg(test)]
mod tests;
