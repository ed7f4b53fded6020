pub mod deliveries;
pub mod users;
