use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15};
use embedded_graphics::pixelcolor::{Rgb888, WebColors};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle};

use super::{draw_text, text_width};
use crate::constants::GRAPH_HISTORY;
use crate::frame::Frame;
use crate::renderable::Renderable;
use crate::sensors::{Metric, Readings, SensorSource};

const DASHBOARD_METRICS: [Metric; 4] = [Metric::Temperature, Metric::Humidity, Metric::Pressure, Metric::Lux];

fn format_value(metric: Metric, readings: Option<&Readings>) -> String {
    match readings {
        Some(r) => match metric {
            Metric::Pressure | Metric::Lux => format!("{:.0} {}", metric.value(r), metric.unit()),
            _ => format!("{:.1} {}", metric.value(r), metric.unit()),
        },
        None => format!("-- {}", metric.unit()),
    }
}

/// Four headline readings, one per row.
pub struct DashboardPanel {
    source: Arc<dyn SensorSource>,
    size: Size,
}

impl DashboardPanel {
    pub fn new(source: Arc<dyn SensorSource>, size: Size) -> Self {
        Self { source, size }
    }
}

impl Renderable for DashboardPanel {
    fn name(&self) -> &str {
        "dashboard"
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let readings = self.source.readings();
        let mut frame = Frame::new(self.size.width, self.size.height);
        let row_h = (self.size.height / DASHBOARD_METRICS.len() as u32) as i32;

        for (i, metric) in DASHBOARD_METRICS.iter().enumerate() {
            let y = i as i32 * row_h + (row_h - 15).max(0) / 2;
            draw_text(&mut frame, metric.label(), Point::new(2, y), &FONT_9X15, Rgb888::CSS_LIGHT_GRAY);

            let value = format_value(*metric, readings.as_ref());
            let x = self.size.width as i32 - text_width(&value, &FONT_9X15) as i32 - 2;
            draw_text(&mut frame, &value, Point::new(x, y), &FONT_9X15, Rgb888::WHITE);
        }
        Ok(frame)
    }
}

/// Rolling line graph of a single metric, sampled each time it renders.
pub struct MetricGraphPanel {
    name: String,
    metric: Metric,
    source: Arc<dyn SensorSource>,
    history: Mutex<VecDeque<f32>>,
    color: Rgb888,
    size: Size,
}

impl MetricGraphPanel {
    pub fn new(metric: Metric, source: Arc<dyn SensorSource>, size: Size) -> Self {
        let color = match metric {
            Metric::Temperature => Rgb888::CSS_ORANGE_RED,
            Metric::Humidity => Rgb888::CSS_DEEP_SKY_BLUE,
            Metric::Pressure => Rgb888::CSS_MEDIUM_PURPLE,
            Metric::Lux => Rgb888::CSS_GOLD,
            _ => Rgb888::CSS_LIME_GREEN,
        };
        Self {
            name: metric.key().to_string(),
            metric,
            source,
            history: Mutex::new(VecDeque::with_capacity(GRAPH_HISTORY)),
            color,
            size,
        }
    }

    fn sample(&self, readings: Option<&Readings>) -> Vec<f32> {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = readings {
            if history.len() == GRAPH_HISTORY {
                history.pop_front();
            }
            history.push_back(self.metric.value(r));
        }
        history.iter().copied().collect()
    }
}

impl Renderable for MetricGraphPanel {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self) -> anyhow::Result<Frame> {
        let readings = self.source.readings();
        let samples = self.sample(readings.as_ref());

        let mut frame = Frame::new(self.size.width, self.size.height);
        let header = format!("{}: {}", self.metric.label(), format_value(self.metric, readings.as_ref()));
        draw_text(&mut frame, &header, Point::new(2, 1), &FONT_6X10, Rgb888::WHITE);

        let top = 13;
        let bottom = self.size.height as i32 - 2;
        if samples.len() < 2 {
            return Ok(frame);
        }
        let (lo, hi) = samples
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let span = if hi - lo < f32::EPSILON { 1.0 } else { hi - lo };
        let y_of = |v: f32| bottom - ((v - lo) / span * (bottom - top) as f32).round() as i32;

        // Newest sample on the right edge.
        let start_x = self.size.width as i32 - samples.len() as i32;
        let style = PrimitiveStyle::with_stroke(self.color, 1);
        for (i, pair) in samples.windows(2).enumerate() {
            let x = start_x + i as i32;
            Line::new(Point::new(x, y_of(pair[0])), Point::new(x + 1, y_of(pair[1])))
                .into_styled(style)
                .draw(&mut frame)
                .ok();
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};
    use crate::sensors::SharedReadings;

    fn size() -> Size {
        Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT)
    }

    #[test]
    fn test_dashboard_renders_without_readings() {
        let panel = DashboardPanel::new(Arc::new(SharedReadings::new()), size());
        let frame = panel.render().expect("renders placeholders");
        assert_eq!((frame.width(), frame.height()), (DISPLAY_WIDTH, DISPLAY_HEIGHT));
    }

    #[test]
    fn test_format_value_precision() {
        let r = Readings {
            temperature: 21.46,
            pressure: 1013.4,
            ..Readings::default()
        };
        assert_eq!(format_value(Metric::Temperature, Some(&r)), "21.5 C");
        assert_eq!(format_value(Metric::Pressure, Some(&r)), "1013 hPa");
        assert_eq!(format_value(Metric::Humidity, None), "-- %");
    }

    #[test]
    fn test_graph_history_is_bounded() {
        let shared = Arc::new(SharedReadings::new());
        let panel = MetricGraphPanel::new(Metric::Temperature, shared.clone(), size());
        assert!(panel.render().is_ok());
        for i in 0..(GRAPH_HISTORY + 20) {
            shared.update(Readings {
                temperature: i as f32,
                ..Readings::default()
            });
            panel.render().expect("graph renders");
        }
        let history = panel.history.lock().unwrap();
        assert_eq!(history.len(), GRAPH_HISTORY);
        assert_eq!(history.back().copied(), Some((GRAPH_HISTORY + 19) as f32));
    }
}
