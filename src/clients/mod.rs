pub mod stripe;
pub mod windcave;
