use serde::{Deserialize, Serialize};

/// Metrics of a single training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-epoch training history, one value per epoch in each series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
}

impl History {
    /// Column names, in report order.
    pub const COLUMNS: [&'static str; 4] = ["loss", "accuracy", "val_loss", "val_accuracy"];

    pub fn push(&mut self, stats: EpochStats) {
        self.loss.push(stats.loss);
        self.accuracy.push(stats.accuracy);
        self.val_loss.push(stats.val_loss);
        self.val_accuracy.push(stats.val_accuracy);
    }

    /// Number of complete epochs recorded.
    pub fn epochs(&self) -> usize {
        self.loss
            .len()
            .min(self.accuracy.len())
            .min(self.val_loss.len())
            .min(self.val_accuracy.len())
    }

    /// Series in [`COLUMNS`](Self::COLUMNS) order.
    pub fn series(&self) -> [&[f64]; 4] {
        [&self.loss, &self.accuracy, &self.val_loss, &self.val_accuracy]
    }

    /// One `[loss, accuracy, val_loss, val_accuracy]` row per epoch.
    pub fn rows(&self) -> impl Iterator<Item = [f64; 4]> + '_ {
        (0..self.epochs()).map(move |i| {
            [
                self.loss[i],
                self.accuracy[i],
                self.val_loss[i],
                self.val_accuracy[i],
            ]
        })
    }
}

/// Outcome of a single-picture inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Nick of the recognized person.
    pub person: String,
    /// Winning class index.
    pub index: usize,
    /// Raw score vector returned by the model.
    pub scores: Vec<f32>,
}

/// Index of the highest score.
///
/// Ties resolve to the lowest index. NaN scores never win; returns `None`
/// for an empty or all-NaN vector.
pub fn best_index(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}
