use serde::{Deserialize, Serialize};

use crate::domain::{SecuritySnapshot, UtcDateTime};
use crate::ValidationError;

/// One observation of a series: a close, a rate or a composed value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub ts: UtcDateTime,
    pub value: f64,
    pub volume: i64,
}

impl PricePoint {
    pub const fn new(ts: UtcDateTime, value: f64, volume: i64) -> Self {
        Self { ts, value, volume }
    }
}

/// Time-ordered points with strictly increasing timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PricePoint>", into = "Vec<PricePoint>")]
pub struct Series {
    points: Vec<PricePoint>,
}

impl Series {
    pub fn new(points: Vec<PricePoint>) -> Result<Self, ValidationError> {
        if let Some(index) = first_out_of_order(&points) {
            return Err(ValidationError::NonMonotonicSeries { index });
        }
        Ok(Self { points })
    }

    /// Sorts by timestamp and keeps the last point for any repeated instant.
    pub fn from_unordered(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|point| point.ts);
        let mut deduped: Vec<PricePoint> = Vec::with_capacity(points.len());
        for point in points {
            match deduped.last_mut() {
                Some(last) if last.ts == point.ts => *last = point,
                _ => deduped.push(point),
            }
        }
        Self { points: deduped }
    }

    /// Constant series of value 1 spanning `[start, end]`.
    pub fn identity(start: UtcDateTime, end: UtcDateTime) -> Self {
        let mut points = vec![PricePoint::new(start, 1.0, 0)];
        if end > start {
            points.push(PricePoint::new(end, 1.0, 0));
        }
        Self { points }
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<PricePoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&PricePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// `Ok(index)` on an exact timestamp hit, otherwise `Err(insertion_point)`.
    pub fn search(&self, at: UtcDateTime) -> Result<usize, usize> {
        self.points.binary_search_by_key(&at, |point| point.ts)
    }

    /// Appends `point`, first dropping every point at or after its timestamp.
    /// Returns how many points were dropped.
    pub fn splice_latest(&mut self, point: PricePoint) -> usize {
        let keep = match self.search(point.ts) {
            Ok(index) | Err(index) => index,
        };
        let dropped = self.points.len() - keep;
        self.points.truncate(keep);
        self.points.push(point);
        dropped
    }

    pub fn is_strictly_increasing(&self) -> bool {
        first_out_of_order(&self.points).is_none()
    }
}

impl TryFrom<Vec<PricePoint>> for Series {
    type Error = ValidationError;

    fn try_from(value: Vec<PricePoint>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Series> for Vec<PricePoint> {
    fn from(value: Series) -> Self {
        value.points
    }
}

fn first_out_of_order(points: &[PricePoint]) -> Option<usize> {
    points
        .windows(2)
        .position(|pair| pair[0].ts >= pair[1].ts)
        .map(|index| index + 1)
}

/// Everything a history source knows about one security: its metadata and
/// its daily closes stamped at the exchange close instant.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityHistory {
    pub snapshot: SecuritySnapshot,
    pub closes: Series,
}

impl SecurityHistory {
    pub fn new(snapshot: SecuritySnapshot, closes: Series) -> Self {
        Self { snapshot, closes }
    }
}
