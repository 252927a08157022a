pub mod stock;
pub mod movement;
pub mod counting;
pub mod operations;
pub mod audit;
