pub mod interval;
pub mod conflict;
pub mod availability;
pub mod lifecycle;
pub mod locks;
pub mod booking;

pub use interval::Interval;
pub use conflict::ConflictDetectionService;
pub use availability::AvailabilityService;
pub use lifecycle::{AppointmentLifecycleService, TransitionPolicy};
pub use locks::ScopeLocks;
pub use booking::AppointmentBookingService;
