//! Named numeric time series shared by counters and stats
//!
//! A series is declared by a Spec event (id, name, integer or float) and
//! mutated by set/add operations stamped with session time. Every mutation
//! appends a point holding the resulting value, so the value at any time is
//! the last point at or before it.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::anomaly::{AnomalyKind, AnomalyLog};

/// How a front end should format a series value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayHint {
    #[default]
    None,
    Memory,
}

impl DisplayHint {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Memory,
            _ => Self::None,
        }
    }
}

/// A series value, integer or floating point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SeriesValue {
    Int(i64),
    Float(f64),
}

impl SeriesValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => v as i64,
        }
    }
}

impl fmt::Display for SeriesValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:.3}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time: f64,
    pub value: SeriesValue,
}

/// One counter or stat
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeries {
    pub id: u32,
    pub name: String,
    pub is_float: bool,
    pub hint: DisplayHint,
    /// Created by an update that arrived before its Spec
    pub placeholder: bool,
    #[serde(skip)]
    points: Vec<SeriesPoint>,
    current: SeriesValue,
}

impl TimeSeries {
    pub fn new(id: u32, name: impl Into<String>, is_float: bool, hint: DisplayHint) -> Self {
        Self {
            id,
            name: name.into(),
            is_float,
            hint,
            placeholder: false,
            points: Vec::new(),
            current: Self::zero(is_float),
        }
    }

    fn placeholder(id: u32, is_float: bool) -> Self {
        Self {
            placeholder: true,
            ..Self::new(id, format!("<unnamed {id}>"), is_float, DisplayHint::None)
        }
    }

    fn zero(is_float: bool) -> SeriesValue {
        if is_float {
            SeriesValue::Float(0.0)
        } else {
            SeriesValue::Int(0)
        }
    }

    pub fn set_int(&mut self, time: f64, value: i64) {
        self.push(time, self.coerce_int(value));
    }

    pub fn set_float(&mut self, time: f64, value: f64) {
        self.push(time, self.coerce_float(value));
    }

    pub fn add_int(&mut self, time: f64, delta: i64) {
        let next = match self.current {
            SeriesValue::Int(v) => SeriesValue::Int(v.wrapping_add(delta)),
            SeriesValue::Float(v) => SeriesValue::Float(v + delta as f64),
        };
        self.push(time, next);
    }

    pub fn add_float(&mut self, time: f64, delta: f64) {
        let next = match self.current {
            SeriesValue::Int(v) => SeriesValue::Int(v.wrapping_add(delta as i64)),
            SeriesValue::Float(v) => SeriesValue::Float(v + delta),
        };
        self.push(time, next);
    }

    /// Latest value
    pub fn current(&self) -> SeriesValue {
        self.current
    }

    /// Value in effect at `time`; `None` before the first update
    pub fn value_at(&self, time: f64) -> Option<SeriesValue> {
        let end = self.points.partition_point(|point| point.time <= time);
        end.checked_sub(1).map(|index| self.points[index].value)
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    /// Smallest and largest values ever held
    pub fn range(&self) -> Option<(SeriesValue, SeriesValue)> {
        let first = self.points.first()?.value;
        Some(self.points.iter().fold((first, first), |(lo, hi), point| {
            let v = point.value.as_f64();
            (
                if v < lo.as_f64() { point.value } else { lo },
                if v > hi.as_f64() { point.value } else { hi },
            )
        }))
    }

    fn coerce_int(&self, value: i64) -> SeriesValue {
        if self.is_float {
            SeriesValue::Float(value as f64)
        } else {
            SeriesValue::Int(value)
        }
    }

    fn coerce_float(&self, value: f64) -> SeriesValue {
        if self.is_float {
            SeriesValue::Float(value)
        } else {
            SeriesValue::Int(value as i64)
        }
    }

    /// Switch between integer and float, converting every stored value
    fn retype(&mut self, is_float: bool) {
        if self.is_float == is_float {
            return;
        }
        self.is_float = is_float;
        let convert = |value: SeriesValue| {
            if is_float {
                SeriesValue::Float(value.as_f64())
            } else {
                SeriesValue::Int(value.as_i64())
            }
        };
        self.current = convert(self.current);
        for point in &mut self.points {
            point.value = convert(point.value);
        }
    }

    fn push(&mut self, time: f64, value: SeriesValue) {
        // Keep points sorted so value_at can binary search
        let time = self.points.last().map_or(time, |last| time.max(last.time));
        self.current = value;
        self.points.push(SeriesPoint { time, value });
    }
}

/// Series keyed by producer id
#[derive(Debug)]
pub struct SeriesTable {
    series: BTreeMap<u32, TimeSeries>,
    anomalies: AnomalyLog,
}

impl SeriesTable {
    pub fn new(max_anomalies: usize) -> Self {
        Self {
            series: BTreeMap::new(),
            anomalies: AnomalyLog::with_capacity(max_anomalies),
        }
    }

    /// Declare a series; a later Spec for the same id renames it
    pub fn define(&mut self, id: u32, name: &str, is_float: bool, hint: DisplayHint) {
        match self.series.get_mut(&id) {
            Some(existing) => {
                if !existing.placeholder && existing.name != name {
                    tracing::debug!(id, old = %existing.name, new = name, "series redefined");
                }
                existing.name = name.to_string();
                existing.retype(is_float);
                existing.hint = hint;
                existing.placeholder = false;
            }
            None => {
                self.series
                    .insert(id, TimeSeries::new(id, name, is_float, hint));
            }
        }
    }

    /// Series to mutate, creating a placeholder for undeclared ids
    pub fn edit(&mut self, id: u32, time: f64, is_float: bool) -> &mut TimeSeries {
        if !self.series.contains_key(&id) {
            self.anomalies.record(
                AnomalyKind::UnknownSeries,
                time,
                None,
                format!("update for undeclared series {id}"),
            );
        }
        self.series
            .entry(id)
            .or_insert_with(|| TimeSeries::placeholder(id, is_float))
    }

    pub fn get(&self, id: u32) -> Option<&TimeSeries> {
        self.series.get(&id)
    }

    pub fn find(&self, name: &str) -> Option<&TimeSeries> {
        self.series.values().find(|series| series.name == name)
    }

    /// Every series ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &TimeSeries> {
        self.series.values()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn value_at(&self, id: u32, time: f64) -> Option<SeriesValue> {
        self.series.get(&id)?.value_at(time)
    }

    pub fn anomalies(&self) -> &AnomalyLog {
        &self.anomalies
    }
}

/// Final value of one series, for summaries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesDigest {
    pub id: u32,
    pub name: String,
    pub hint: DisplayHint,
    pub updates: usize,
    pub value: SeriesValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_at: Option<SeriesValue>,
}

impl SeriesTable {
    pub fn digest(&self, at: Option<f64>) -> Vec<SeriesDigest> {
        self.iter()
            .map(|series| SeriesDigest {
                id: series.id,
                name: series.name.clone(),
                hint: series.hint,
                updates: series.points().len(),
                value: series.current(),
                value_at: at.and_then(|time| series.value_at(time)),
            })
            .collect()
    }
}
