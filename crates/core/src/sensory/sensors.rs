use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::types::{Fields, Reading};

/// A sensor the pipeline can sample at any time without blocking.
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;
    fn read(&self) -> Reading;
}

/// A sensor fed by prefixed text lines (e.g. `TEMP:23.5,HUM:46.7`).
pub trait LineSensor: SensorSource {
    fn prefix(&self) -> &str;
    /// Apply one line. Malformed lines are ignored.
    fn handle_line(&self, line: &str);
}

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => Fields::new(),
    }
}

/// Seconds elapsed since the sensor was created, rounded to milliseconds.
#[derive(Debug)]
pub struct TimeSensor {
    started: Instant,
}

impl TimeSensor {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for TimeSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for TimeSensor {
    fn name(&self) -> &str {
        "time"
    }

    fn read(&self) -> Reading {
        let secs = self.started.elapsed().as_secs_f64();
        let rounded = (secs * 1000.0).round() / 1000.0;
        Reading::new(self.name(), fields(json!({ "elapsed": rounded })))
    }
}

/// Last temperature/humidity pair from `TEMP:<t>,HUM:<h>` lines.
#[derive(Debug, Default)]
pub struct TempSensor {
    last: Mutex<Option<(f64, f64)>>,
}

impl TempSensor {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(line: &str) -> Option<(f64, f64)> {
        let rest = line.trim().strip_prefix("TEMP:")?;
        let (temp, hum) = rest.split_once(",HUM:")?;
        Some((temp.trim().parse().ok()?, hum.trim().parse().ok()?))
    }
}

impl SensorSource for TempSensor {
    fn name(&self) -> &str {
        "temperature"
    }

    fn read(&self) -> Reading {
        let last = *self.last.lock().unwrap_or_else(|e| e.into_inner());
        let (temperature, humidity) = match last {
            Some((t, h)) => (json!(t), json!(h)),
            None => (Value::Null, Value::Null),
        };
        Reading::new(
            self.name(),
            fields(json!({ "temperature": temperature, "humidity": humidity })),
        )
    }
}

impl LineSensor for TempSensor {
    fn prefix(&self) -> &str {
        "TEMP:"
    }

    fn handle_line(&self, line: &str) {
        match Self::parse(line) {
            Some(pair) => *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(pair),
            None => tracing::debug!(line, "malformed TEMP line ignored"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DistanceWindow {
    current: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

/// Distance from `DIST:<v>` lines, with min/max tracked since the last read.
#[derive(Debug, Default)]
pub struct DistanceSensor {
    window: Mutex<DistanceWindow>,
}

impl DistanceSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorSource for DistanceSensor {
    fn name(&self) -> &str {
        "distance"
    }

    /// Report the window, then restart it at the current value.
    fn read(&self) -> Reading {
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = *w;
        w.min = w.current;
        w.max = w.current;
        drop(w);
        Reading::new(
            self.name(),
            fields(json!({
                "current": snapshot.current,
                "min": snapshot.min,
                "max": snapshot.max,
            })),
        )
    }
}

impl LineSensor for DistanceSensor {
    fn prefix(&self) -> &str {
        "DIST:"
    }

    fn handle_line(&self, line: &str) {
        let Some(val) = line
            .trim()
            .strip_prefix("DIST:")
            .and_then(|raw| raw.trim().parse::<f64>().ok())
        else {
            tracing::debug!(line, "malformed DIST line ignored");
            return;
        };
        let mut w = self.window.lock().unwrap_or_else(|e| e.into_inner());
        w.current = Some(val);
        w.min = Some(w.min.map_or(val, |m| m.min(val)));
        w.max = Some(w.max.map_or(val, |m| m.max(val)));
    }
}

/// Samples every registered sensor into one snapshot reading,
/// each sensor's fields nested under its name.
#[derive(Clone, Default)]
pub struct SensorHub {
    sensors: Vec<Arc<dyn SensorSource>>,
}

impl SensorHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sensor: Arc<dyn SensorSource>) {
        self.sensors.push(sensor);
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn snapshot(&self) -> Reading {
        let fields: Fields = self
            .sensors
            .iter()
            .map(|s| {
                let reading = s.read();
                let nested: serde_json::Map<String, Value> = reading.fields.into_iter().collect();
                (s.name().to_owned(), Value::Object(nested))
            })
            .collect();
        Reading::new("snapshot", fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_sensor_parses_pair() {
        let s = TempSensor::new();
        s.handle_line("TEMP:23.5,HUM:46.7");
        let r = s.read();
        assert_eq!(r.fields["temperature"], json!(23.5));
        assert_eq!(r.fields["humidity"], json!(46.7));
    }

    #[test]
    fn temp_sensor_ignores_malformed_lines() {
        let s = TempSensor::new();
        s.handle_line("TEMP:23.5,HUM:46.7");
        s.handle_line("TEMP:hot");
        s.handle_line("TEMP:24.0");
        let r = s.read();
        assert_eq!(r.fields["temperature"], json!(23.5));
    }

    #[test]
    fn temp_sensor_starts_empty() {
        let r = TempSensor::new().read();
        assert_eq!(r.fields["temperature"], Value::Null);
    }

    #[test]
    fn distance_tracks_window_and_resets_on_read() {
        let s = DistanceSensor::new();
        for v in ["DIST:30", "DIST:12.5", "DIST:40", "DIST:20"] {
            s.handle_line(v);
        }
        let r = s.read();
        assert_eq!(r.fields["current"], json!(20.0));
        assert_eq!(r.fields["min"], json!(12.5));
        assert_eq!(r.fields["max"], json!(40.0));

        s.handle_line("DIST:25");
        let r = s.read();
        assert_eq!(r.fields["min"], json!(20.0));
        assert_eq!(r.fields["max"], json!(25.0));
    }

    #[test]
    fn distance_ignores_garbage() {
        let s = DistanceSensor::new();
        s.handle_line("DIST:");
        s.handle_line("DIST:abc");
        assert_eq!(s.read().fields["current"], Value::Null);
    }

    #[test]
    fn time_sensor_reports_elapsed() {
        let r = TimeSensor::new().read();
        assert!(r.fields["elapsed"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn hub_nests_fields_by_sensor_name() {
        let temp = Arc::new(TempSensor::new());
        temp.handle_line("TEMP:21.0,HUM:40.0");
        let mut hub = SensorHub::new();
        hub.register(temp);
        hub.register(Arc::new(DistanceSensor::new()));
        let snap = hub.snapshot();
        assert_eq!(snap.source_id, "snapshot");
        assert_eq!(snap.fields["temperature"]["temperature"], json!(21.0));
        assert!(snap.fields["distance"].is_object());
        assert_eq!(hub.len(), 2);
    }
}
