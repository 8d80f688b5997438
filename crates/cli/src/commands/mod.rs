pub mod cluster;
pub mod forecast;
pub mod model;
