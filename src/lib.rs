pub mod catalog;
pub mod config;
pub mod eventloop;
pub mod inverter;
pub mod mqtt;
pub mod registers;
pub mod sensor;
