pub mod queue {
    pub use akari_queue::*;
}
pub mod resources {
    pub use akari_resources::*;
}
