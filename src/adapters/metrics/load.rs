//! Host load average for the embedded stats endpoint.

use serde::Serialize;

const LOADAVG_PATH: &str = "/proc/loadavg";

/// 1/5/15 minute load average of a GNU/Linux host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    #[serde(rename = "Load1")]
    pub load1: f64,
    #[serde(rename = "Load5")]
    pub load5: f64,
    #[serde(rename = "Load15")]
    pub load15: f64,
}

/// Parse the contents of `/proc/loadavg`. Missing or invalid fields read as zero.
pub fn parse_load_avg(content: &str) -> LoadAverage {
    let mut fields = content
        .split_whitespace()
        .map(|field| field.parse::<f64>().unwrap_or(0.0));

    LoadAverage {
        load1: fields.next().unwrap_or(0.0),
        load5: fields.next().unwrap_or(0.0),
        load15: fields.next().unwrap_or(0.0),
    }
}

/// Current load average; zeros on hosts without `/proc/loadavg`.
pub fn read_load_avg() -> LoadAverage {
    std::fs::read_to_string(LOADAVG_PATH)
        .map(|content| parse_load_avg(&content))
        .unwrap_or_default()
}
