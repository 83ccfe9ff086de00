pub mod health;
pub mod mock;
pub mod porters;
