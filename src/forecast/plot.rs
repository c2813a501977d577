use std::{fs, io, path::Path};

use plotly::common::{Mode, Title};
use plotly::{Layout, Plot, Scatter};

use super::Prediction;

/// Real and predicted values on the same chart.
pub fn prediction_plot(predictions: &[Prediction]) -> Plot {
    let months: Vec<String> = predictions.iter().map(|p| p.month.to_string()).collect();
    let real = Scatter::new(
        months.clone(),
        predictions.iter().map(|p| p.real).collect::<Vec<f64>>(),
    )
    .mode(Mode::LinesMarkers)
    .name("Real");
    let predicted = Scatter::new(
        months,
        predictions.iter().map(|p| p.predicted).collect::<Vec<f64>>(),
    )
    .mode(Mode::LinesMarkers)
    .name("Predicted");

    let mut plot = Plot::new();
    plot.add_trace(real);
    plot.add_trace(predicted);
    plot.set_layout(Layout::new().title(Title::with_text("Monthly series forecast")));
    plot
}

pub fn write_prediction_plot(predictions: &[Prediction], path: &Path) -> io::Result<()> {
    fs::write(path, prediction_plot(predictions).to_html())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::month::month;

    fn predictions() -> Vec<Prediction> {
        vec![
            Prediction {
                month: month(2022, 11),
                real: 10.0,
                predicted: 11.0,
            },
            Prediction {
                month: month(2022, 12),
                real: 12.0,
                predicted: 11.5,
            },
        ]
    }

    #[test]
    fn plot_has_both_traces() {
        let json = prediction_plot(&predictions()).to_json();
        assert!(json.contains("\"Real\""));
        assert!(json.contains("\"Predicted\""));
        assert!(json.contains("2022-12"));
    }

    #[test]
    fn write_plot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("forecast.html");
        write_prediction_plot(&predictions(), &path)?;
        assert!(fs::read_to_string(&path)?.contains("Predicted"));

        // a directory that doesn't exist is an error, not a panic
        let bad = dir.path().join("missing").join("forecast.html");
        assert!(write_prediction_plot(&predictions(), &bad).is_err());
        Ok(())
    }
}
