//! Append-only store of per-period metric values.
//!
//! Each metric name maps to at most one value per period. A second write
//! for the same `(metric, period)` pair is a scheduling bug and is
//! rejected. Queries return owned snapshots, so later writes never change
//! a result already handed out.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeBounds;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use macrosim_types::Period;

/// Errors returned by the repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// The `(metric, period)` pair already holds a value.
    #[error("duplicate write of {metric} for period {period}")]
    DuplicateWrite {
        /// The metric name.
        metric: String,
        /// The period written twice.
        period: Period,
    },

    /// Metric names must not be empty.
    #[error("metric name must not be empty")]
    EmptyMetricName,
}

/// One `(period, value)` pair of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// The period.
    pub period: Period,
    /// The recorded value.
    pub value: Decimal,
}

/// An owned, ordered copy of part of one series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    metric: String,
    points: Vec<SeriesPoint>,
}

impl SeriesSnapshot {
    /// The metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the snapshot has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in period order.
    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    /// Iterate the points in period order. Can be called any number of
    /// times.
    pub fn iter(&self) -> std::slice::Iter<'_, SeriesPoint> {
        self.points.iter()
    }

    /// The values alone, in period order.
    pub fn values(&self) -> impl Iterator<Item = Decimal> + '_ {
        self.points.iter().map(|p| p.value)
    }

    /// The last point, if any.
    pub fn last(&self) -> Option<&SeriesPoint> {
        self.points.last()
    }
}

impl<'a> IntoIterator for &'a SeriesSnapshot {
    type Item = &'a SeriesPoint;
    type IntoIter = std::slice::Iter<'a, SeriesPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// A labelled period, shown as a vertical line on charts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    /// The marked period.
    pub period: Period,
    /// The label.
    pub label: String,
}

/// Every series over a range of periods, as columns.
///
/// Row `i` of every column belongs to `periods[i]`; a metric with no value
/// for that period has `None` there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTable {
    /// The periods covered, in order.
    pub periods: Vec<Period>,
    /// One column per metric, keyed by name.
    pub columns: BTreeMap<String, Vec<Option<Decimal>>>,
    /// Markers inside the range.
    pub markers: Vec<Marker>,
}

/// Per-metric, per-period value store.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesRepository {
    /// Values keyed by metric name, then period step.
    series: BTreeMap<String, BTreeMap<u64, SeriesPoint>>,
    /// Markers in insertion order.
    markers: Vec<Marker>,
}

impl TimeSeriesRepository {
    /// Create an empty repository.
    pub const fn new() -> Self {
        Self {
            series: BTreeMap::new(),
            markers: Vec::new(),
        }
    }

    /// Record `value` for `metric` at `period`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DuplicateWrite`] if the pair already
    /// holds a value (the stored value is kept), or
    /// [`RepositoryError::EmptyMetricName`].
    pub fn record(&mut self, metric: &str, period: &Period, value: Decimal) -> Result<(), RepositoryError> {
        if metric.is_empty() {
            return Err(RepositoryError::EmptyMetricName);
        }
        let series = self.series.entry(metric.to_owned()).or_default();
        if series.contains_key(&period.step()) {
            return Err(RepositoryError::DuplicateWrite {
                metric: metric.to_owned(),
                period: *period,
            });
        }
        series.insert(
            period.step(),
            SeriesPoint {
                period: *period,
                value,
            },
        );
        Ok(())
    }

    /// Record every `(metric, value)` of `values` at `period`, or nothing.
    ///
    /// Returns the number of values written.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DuplicateWrite`] if a metric appears
    /// twice in `values` or already holds a value for `period`, or
    /// [`RepositoryError::EmptyMetricName`]. The repository is unchanged
    /// on error.
    pub fn record_batch(
        &mut self,
        period: &Period,
        values: Vec<(String, Decimal)>,
    ) -> Result<usize, RepositoryError> {
        let step = period.step();
        {
            let mut staged: BTreeSet<&str> = BTreeSet::new();
            for (metric, _) in &values {
                if metric.is_empty() {
                    return Err(RepositoryError::EmptyMetricName);
                }
                if !staged.insert(metric.as_str()) || self.get(metric, step).is_some() {
                    return Err(RepositoryError::DuplicateWrite {
                        metric: metric.clone(),
                        period: *period,
                    });
                }
            }
        }

        let written = values.len();
        for (metric, value) in values {
            self.series.entry(metric).or_default().insert(
                step,
                SeriesPoint {
                    period: *period,
                    value,
                },
            );
        }
        Ok(written)
    }

    /// Points of `metric` whose step lies in `steps`, ordered by period.
    /// An unknown metric yields an empty snapshot.
    pub fn query(&self, metric: &str, steps: impl RangeBounds<u64>) -> SeriesSnapshot {
        let points = self
            .series
            .get(metric)
            .map(|series| series.range(steps).map(|(_, point)| *point).collect())
            .unwrap_or_default();
        SeriesSnapshot {
            metric: metric.to_owned(),
            points,
        }
    }

    /// The value of `metric` at `step`, if recorded.
    pub fn get(&self, metric: &str, step: u64) -> Option<Decimal> {
        self.series.get(metric)?.get(&step).map(|p| p.value)
    }

    /// Every metric name written so far.
    pub fn list_metrics(&self) -> BTreeSet<String> {
        self.series.keys().cloned().collect()
    }

    /// Number of metrics.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Label `period`.
    pub fn add_marker(&mut self, period: &Period, label: impl Into<String>) {
        self.markers.push(Marker {
            period: *period,
            label: label.into(),
        });
    }

    /// Markers whose step lies in `steps`, ordered by period then
    /// insertion.
    pub fn markers(&self, steps: impl RangeBounds<u64>) -> Vec<Marker> {
        let mut markers: Vec<Marker> = self
            .markers
            .iter()
            .filter(|m| steps.contains(&m.period.step()))
            .cloned()
            .collect();
        markers.sort_by_key(|m| m.period.step());
        markers
    }

    /// Every series over `steps` as a column table.
    pub fn export(&self, steps: impl RangeBounds<u64> + Clone) -> SeriesTable {
        let mut periods: BTreeMap<u64, Period> = BTreeMap::new();
        for series in self.series.values() {
            for (step, point) in series.range(steps.clone()) {
                periods.entry(*step).or_insert(point.period);
            }
        }
        let columns = self
            .series
            .iter()
            .map(|(name, series)| {
                let column = periods
                    .keys()
                    .map(|step| series.get(step).map(|p| p.value))
                    .collect();
                (name.clone(), column)
            })
            .collect();
        SeriesTable {
            periods: periods.into_values().collect(),
            columns,
            markers: self.markers(steps),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use rust_decimal_macros::dec;

    use macrosim_types::YearMonth;

    use super::*;

    fn p(step: u64) -> Period {
        Period::new(step, YearMonth::default())
    }

    #[test]
    fn duplicate_write_fails_and_keeps_value() {
        let mut repo = TimeSeriesRepository::new();
        repo.record("prices", &p(0), dec!(1)).unwrap();
        let err = repo.record("prices", &p(0), dec!(2)).unwrap_err();
        assert_eq!(
            err,
            RepositoryError::DuplicateWrite {
                metric: "prices".to_owned(),
                period: p(0),
            }
        );
        assert_eq!(repo.get("prices", 0), Some(dec!(1)));
        assert!(repo.record("", &p(1), dec!(1)).is_err());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut repo = TimeSeriesRepository::new();
        repo.record("a", &p(0), dec!(1)).unwrap();

        let clash = vec![("b".to_owned(), dec!(2)), ("a".to_owned(), dec!(3))];
        assert!(matches!(
            repo.record_batch(&p(0), clash),
            Err(RepositoryError::DuplicateWrite { metric, .. }) if metric == "a"
        ));
        let twice = vec![("c".to_owned(), dec!(1)), ("c".to_owned(), dec!(2))];
        assert!(repo.record_batch(&p(0), twice).is_err());
        let unnamed = vec![("d".to_owned(), dec!(1)), (String::new(), dec!(2))];
        assert!(repo.record_batch(&p(0), unnamed).is_err());
        assert_eq!(repo.list_metrics().len(), 1);
        assert_eq!(repo.get("a", 0), Some(dec!(1)));

        let batch = vec![("a".to_owned(), dec!(4)), ("b".to_owned(), dec!(5))];
        assert_eq!(repo.record_batch(&p(1), batch).unwrap(), 2);
        assert_eq!(repo.get("b", 1), Some(dec!(5)));
    }

    #[test]
    fn query_is_ordered_and_ranged() {
        let mut repo = TimeSeriesRepository::new();
        for step in [3, 0, 2, 1] {
            repo.record("volume", &p(step), Decimal::from(step)).unwrap();
        }
        let all = repo.query("volume", ..);
        let steps: Vec<u64> = all.iter().map(|pt| pt.period.step()).collect();
        assert_eq!(steps, vec![0, 1, 2, 3]);

        let middle = repo.query("volume", 1..3);
        assert_eq!(middle.values().collect::<Vec<_>>(), vec![dec!(1), dec!(2)]);
        assert!(repo.query("missing", ..).is_empty());
    }

    #[test]
    fn snapshot_unaffected_by_later_writes() {
        let mut repo = TimeSeriesRepository::new();
        repo.record("volume", &p(0), dec!(5)).unwrap();
        let snapshot = repo.query("volume", ..);
        repo.record("volume", &p(1), dec!(6)).unwrap();
        assert_eq!(snapshot.len(), 1);
        // Re-iterable.
        assert_eq!((&snapshot).into_iter().count(), 1);
        assert_eq!(snapshot.iter().count(), 1);
        assert_eq!(repo.query("volume", ..).len(), 2);
    }

    #[test]
    fn lists_metrics_and_exports_columns() {
        let mut repo = TimeSeriesRepository::new();
        repo.record("a", &p(0), dec!(1)).unwrap();
        repo.record("a", &p(1), dec!(2)).unwrap();
        repo.record("b", &p(1), dec!(9)).unwrap();
        repo.add_marker(&p(1), "Bank Failure");
        repo.add_marker(&p(5), "Later");

        let names: Vec<String> = repo.list_metrics().into_iter().collect();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);

        let table = repo.export(0..2);
        assert_eq!(table.periods, vec![p(0), p(1)]);
        assert_eq!(table.columns["a"], vec![Some(dec!(1)), Some(dec!(2))]);
        assert_eq!(table.columns["b"], vec![None, Some(dec!(9))]);
        assert_eq!(table.markers.len(), 1);
        assert_eq!(table.markers[0].label, "Bank Failure");
        assert!(serde_json::to_string(&table).is_ok());
    }
}
