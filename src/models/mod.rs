// Models module - Database entity representations

pub mod attendance;
pub mod token;

pub use attendance::{
    AttendanceRecord, AttendanceReportRow, AttendanceState, AttendanceSummary, AttendeeDetails,
    AttendeeInput, TransitionType,
};
pub use token::{PurgeCounts, Token, TokenFilter, TokenStatus, TokenWithAttendee};
