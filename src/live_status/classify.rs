use crate::live_status::types::LiveStatus;

/// Upstream error blurbs are compact HTML fragments; anything under this
/// length is one of them. Longer bodies that still lack the status marker
/// are cached/static pages served by intermediaries.
pub const SHORT_BODY_MAX: usize = 150;

#[derive(Clone, Debug)]
pub enum Classification {
    ShortNotRunning,
    ShortTimetable,
    ShortUnknown,
    Static,
    Malformed(String),
    Valid(Box<LiveStatus>),
}

pub fn classify(body: &[u8]) -> Classification {
    let text = String::from_utf8_lossy(body);

    if body.len() < SHORT_BODY_MAX {
        return if text.contains("not running") {
            Classification::ShortNotRunning
        } else if text.contains("update the timetable") {
            Classification::ShortTimetable
        } else {
            Classification::ShortUnknown
        };
    }

    if !text.contains("running_status") && !text.contains("running status") {
        return Classification::Static;
    }

    match serde_json::from_slice::<LiveStatus>(body) {
        Ok(parsed) => Classification::Valid(Box::new(parsed)),
        Err(err) => Classification::Malformed(err.to_string()),
    }
}
