pub mod config;
pub mod db;
pub mod health;
pub mod inference;
pub mod logging;
pub mod pipeline;
pub mod routes;
pub mod upstream;
