pub mod health;
pub mod runsync;
