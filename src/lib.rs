pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod framing;
pub mod location;
pub mod metadata;
pub mod orientation;
pub mod protocol;
pub mod selector;
pub mod server;
pub mod store;
pub mod sync;
pub mod platform {
    pub mod display;
}
pub mod tasks {
    pub mod slideshow;
    pub mod sync_schedule;
}
