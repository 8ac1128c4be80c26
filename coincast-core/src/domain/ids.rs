use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Model identity: `{FAMILY}_{YYYYMMDD}`.
///
/// Ordering is by the string form, which for a fixed family is training-date
/// order. The registry picks the latest artifact for an asset this way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelVersion {
    pub family: String,
    pub trained_on: NaiveDate,
}

#[derive(Debug, Error, PartialEq)]
pub enum ModelVersionError {
    #[error("model version '{0}' is not of the form FAMILY_YYYYMMDD")]
    Malformed(String),
}

impl ModelVersion {
    pub fn new(family: &str, trained_on: NaiveDate) -> Self {
        Self {
            family: family.to_ascii_uppercase(),
            trained_on,
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.family, self.trained_on.format("%Y%m%d"))
    }
}

impl FromStr for ModelVersion {
    type Err = ModelVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (family, date) = s
            .rsplit_once('_')
            .ok_or_else(|| ModelVersionError::Malformed(s.to_string()))?;
        if family.is_empty() {
            return Err(ModelVersionError::Malformed(s.to_string()));
        }
        let trained_on = NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|_| ModelVersionError::Malformed(s.to_string()))?;
        Ok(Self {
            family: family.to_string(),
            trained_on,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let v = ModelVersion::new("ridge", NaiveDate::from_ymd_opt(2024, 12, 1).unwrap());
        assert_eq!(v.to_string(), "RIDGE_20241201");
        assert_eq!("RIDGE_20241201".parse::<ModelVersion>().unwrap(), v);
    }

    #[test]
    fn family_may_contain_underscores() {
        let v: ModelVersion = "LSTM_V1_20241201".parse().unwrap();
        assert_eq!(v.family, "LSTM_V1");
    }

    #[test]
    fn rejects_garbage() {
        assert!("RIDGE".parse::<ModelVersion>().is_err());
        assert!("RIDGE_2024".parse::<ModelVersion>().is_err());
        assert!("_20241201".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn string_order_follows_training_date() {
        let a = ModelVersion::new("RIDGE", NaiveDate::from_ymd_opt(2024, 9, 30).unwrap());
        let b = ModelVersion::new("RIDGE", NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert!(a.to_string() < b.to_string());
    }
}
