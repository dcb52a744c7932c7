pub mod dedup;
pub mod geocode;
pub mod lifecycle;
pub mod location;
pub mod post;
pub mod snap;
pub mod stats;
