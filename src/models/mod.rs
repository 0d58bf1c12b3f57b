pub mod user;
pub mod venue;
pub mod event;
pub mod seat;
pub mod intent;
pub mod booking;

pub use user::User;
pub use venue::Venue;
pub use event::Event;
pub use seat::Seat;
pub use intent::BookingIntent;
pub use booking::Booking;
