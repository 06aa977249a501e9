use nu_ansi_term::Color::{Green, Red, White};
use std::time::Duration;

/// Formats an average iteration time in ms.
pub fn dur_avg(measure: Duration) -> String {
    format!("Real: {}", White.bold().paint(format!("{:.3} ms/i", measure.as_secs_f64() * 1e3)))
}

pub fn pass(label: &str) -> String {
    format!("{} {label}", Green.bold().paint("OK"))
}

pub fn fail(label: &str) -> String {
    format!("{} {label}", Red.bold().paint("FAIL"))
}
