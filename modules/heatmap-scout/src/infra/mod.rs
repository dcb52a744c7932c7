pub mod gateway;
pub mod throttle;
