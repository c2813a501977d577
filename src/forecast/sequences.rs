use super::ForecastError;

/// Sliding windows over the series: each input is `seq_length` consecutive values
/// and its target is the value right after the window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequences {
    pub inputs: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl Sequences {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Chronological split, the last `test_fraction` of the windows go to the
    /// second half.  Never shuffles.
    pub fn split(&self, test_fraction: f64) -> (Sequences, Sequences) {
        let n_test = ((self.len() as f64) * test_fraction.clamp(0.0, 1.0)).round() as usize;
        let cut = self.len() - n_test.min(self.len());
        (
            Sequences {
                inputs: self.inputs[..cut].to_vec(),
                targets: self.targets[..cut].to_vec(),
            },
            Sequences {
                inputs: self.inputs[cut..].to_vec(),
                targets: self.targets[cut..].to_vec(),
            },
        )
    }
}

pub fn make_sequences(data: &[f64], seq_length: usize) -> Result<Sequences, ForecastError> {
    if seq_length == 0 {
        return Err(ForecastError::Shape("seq_length must be positive".to_string()));
    }
    if data.len() <= seq_length {
        return Err(ForecastError::NotEnoughData {
            needed: seq_length + 1,
            got: data.len(),
        });
    }
    let (inputs, targets) = data
        .windows(seq_length + 1)
        .map(|w| (w[..seq_length].to_vec(), w[seq_length]))
        .unzip();
    Ok(Sequences { inputs, targets })
}
