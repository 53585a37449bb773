/// Formats whole seconds as `mm:ss`. Minutes keep counting past 59.
pub fn format_mm_ss(total_seconds: u64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::format_mm_ss;

    #[test]
    fn pads_minutes_and_seconds() {
        assert_eq!(format_mm_ss(0), "00:00");
        assert_eq!(format_mm_ss(65), "01:05");
        assert_eq!(format_mm_ss(3599), "59:59");
    }

    #[test]
    fn minutes_do_not_wrap_at_an_hour() {
        assert_eq!(format_mm_ss(3600), "60:00");
    }
}
