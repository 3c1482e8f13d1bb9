pub mod availability;
pub mod booking;
pub mod generation;
pub mod slots;

pub use availability::{AvailabilityService, AvailabilityUpdate, BulkWrite};
pub use booking::{Booking, BookingService};
pub use generation::{BulkGenerationJob, SlotGenerator};
