//! ET session windows.
//!
//! All session logic evaluates in America/New_York so daylight saving is
//! honored. A timestamp exactly on a shared boundary belongs to the earlier
//! session (11:00 is still ny_am).

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;

use crate::domain::Session;

/// Session for a UTC instant.
pub fn session_at(ts: DateTime<Utc>) -> Session {
    let et = ts.with_timezone(&New_York).time();

    let t = |h: u32, m: u32| NaiveTime::from_hms_opt(h, m, 0).expect("valid time");

    if et >= t(18, 0) || et <= t(2, 0) {
        Session::Asia
    } else if et >= t(3, 0) && et <= t(8, 0) {
        Session::London
    } else if et >= t(9, 30) && et <= t(11, 0) {
        Session::NyAm
    } else if et > t(11, 0) && et <= t(14, 0) {
        Session::NyLunch
    } else if et > t(14, 0) && et <= t(16, 0) {
        Session::NyPm
    } else {
        Session::Off
    }
}

/// ET calendar day for a UTC instant. Daily resets and date slicing both key
/// off this.
pub fn et_date(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&New_York).date_naive()
}

/// ET minute-of-day, for playbook time-window gates.
pub fn et_minute_of_day(ts: DateTime<Utc>) -> u32 {
    use chrono::Timelike;
    let et = ts.with_timezone(&New_York).time();
    et.hour() * 60 + et.minute()
}

/// UTC instant of an ET wall-clock time on a given ET date.
pub fn et_to_utc(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    New_York
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .expect("unambiguous ET time")
        .with_timezone(&Utc)
}
