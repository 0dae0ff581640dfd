pub mod events;

pub use events::WorkshopEvent;
