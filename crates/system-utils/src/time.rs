use std::time::SystemTime;

pub fn rfc3339(at: SystemTime) -> String {
    humantime::format_rfc3339_seconds(at).to_string()
}

pub fn file_stamp(at: SystemTime) -> String {
    let digits: String = humantime::format_rfc3339_millis(at)
        .to_string()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    match (digits.get(..8), digits.get(8..14), digits.get(14..)) {
        (Some(date), Some(time), Some(millis)) => format!("{date}-{time}-{millis}"),
        _ => digits,
    }
}
