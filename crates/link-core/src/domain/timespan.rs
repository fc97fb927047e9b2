//! Renders a device's connected time for people.

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Formats a duration in seconds using its two most significant units.
///
/// ```rust
/// use link_core::format_connect_time;
///
/// assert_eq!(format_connect_time(42), "42 Seconds.");
/// assert_eq!(format_connect_time(3725), "1 Hours, 2 Minutes.");
/// ```
pub fn format_connect_time(seconds: u64) -> String {
    let days = seconds / DAY;
    let hours = seconds / HOUR;
    let minutes = seconds / MINUTE;

    if days > 0 {
        format!("{days} Days, {} Hours.", hours - days * 24)
    } else if hours > 0 {
        format!("{hours} Hours, {} Minutes.", minutes - hours * 60)
    } else if minutes > 0 {
        format!("{minutes} Minutes, {} Seconds.", seconds - minutes * 60)
    } else {
        format!("{seconds} Seconds.")
    }
}
