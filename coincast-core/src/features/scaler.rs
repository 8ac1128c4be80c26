use serde::{Deserialize, Serialize};

use super::DataError;

/// Per-feature min-max scaler onto [0, 1].
///
/// Fit once on an asset's training history and stored in the model artifact;
/// inference reuses the stored bounds. Values outside the fitted range map
/// outside [0, 1] and are not clipped. A constant feature maps to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit(rows: &[Vec<f64>], width: usize) -> Result<Self, DataError> {
        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for row in rows {
            if row.len() != width {
                return Err(DataError::SchemaMismatch {
                    expected: width,
                    actual: row.len(),
                });
            }
            for (j, v) in row.iter().enumerate() {
                min[j] = min[j].min(*v);
                max[j] = max[j].max(*v);
            }
        }
        if rows.is_empty() {
            min.fill(0.0);
            max.fill(0.0);
        }
        Ok(Self { min, max })
    }

    pub fn width(&self) -> usize {
        self.min.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, DataError> {
        if row.len() != self.width() {
            return Err(DataError::SchemaMismatch {
                expected: self.width(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .enumerate()
            .map(|(j, v)| {
                let range = self.max[j] - self.min[j];
                if range.abs() < f64::EPSILON {
                    0.0
                } else {
                    (v - self.min[j]) / range
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_to_unit_interval() {
        let rows = vec![vec![10.0, 5.0], vec![20.0, 5.0], vec![15.0, 5.0]];
        let s = MinMaxScaler::fit(&rows, 2).unwrap();
        assert_eq!(s.transform_row(&[15.0, 5.0]).unwrap(), vec![0.5, 0.0]);
        assert_eq!(s.transform_row(&[30.0, 9.0]).unwrap(), vec![2.0, 0.0]);
    }

    #[test]
    fn width_mismatch_is_an_error() {
        let s = MinMaxScaler::fit(&[vec![1.0, 2.0]], 2).unwrap();
        assert_eq!(
            s.transform_row(&[1.0]),
            Err(DataError::SchemaMismatch { expected: 2, actual: 1 })
        );
        assert!(MinMaxScaler::fit(&[vec![1.0]], 2).is_err());
    }

    #[test]
    fn survives_json() {
        let s = MinMaxScaler::fit(&[vec![1.0], vec![3.0]], 1).unwrap();
        let back: MinMaxScaler = serde_json::from_str(&serde_json::to_string(&s).unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
