//! Core types: meetings, recurrence, time windows, free/busy

pub mod freebusy;
pub mod meeting;
pub mod time;
pub mod tracing;

pub use freebusy::{BusyInterval, FreeSlot, find_free_slots};
pub use meeting::{
    Meeting, MeetingStatus, MeetingUpdate, NewMeeting, ParseRecurrenceError, RecurrenceRule,
};
pub use time::{TimeWindow, minutes_until_ceil};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
