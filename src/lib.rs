pub mod db;
pub mod forecast;
pub mod interval;
pub mod pipeline;
pub mod utils;
