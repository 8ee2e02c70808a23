use crate::domain::errors::ConfigError;
use crate::domain::session::HolidayCalendar;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
struct HolidaysFile {
    #[serde(default)]
    holidays: Vec<NaiveDate>,
}

/// Loads the holiday calendar. A missing file is an empty calendar; a file
/// that exists but fails to parse refuses startup.
pub fn load_holidays(path: &Path) -> Result<HolidayCalendar, ConfigError> {
    if !path.exists() {
        return Ok(HolidayCalendar::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::UnreadableFile {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let file: HolidaysFile =
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::UnreadableFile {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
    Ok(HolidayCalendar::new(file.holidays))
}
