//! Translation of Sonar rating values into letter grades.

/// Maps a numeric rating value as returned by the measures API to its
/// letter grade. Anything outside the five known codes yields `None`.
pub fn rating_letter(raw: &str) -> Option<&'static str> {
    match raw {
        "1.0" => Some("A"),
        "2.0" => Some("B"),
        "3.0" => Some("C"),
        "4.0" => Some("D"),
        "5.0" => Some("E"),
        _ => None,
    }
}

/// Translates the rating stored for `field`, degrading to an empty string
/// when the value is missing or unknown.
pub fn translate_rating(field: &str, raw: Option<&str>) -> String {
    match raw.and_then(rating_letter) {
        Some(letter) => letter.to_string(),
        None => {
            tracing::warn!(
                field = %field,
                raw = %raw.unwrap_or_default(),
                "Unmapped rating value, storing empty rating"
            );
            String::new()
        }
    }
}
