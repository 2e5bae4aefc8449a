pub mod audit;
pub mod config;
pub mod fractal;
pub mod health;
pub mod serve;
