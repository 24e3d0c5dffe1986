mod clock;

pub use clock::{next_due_description, DueClock};
