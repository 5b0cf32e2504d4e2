//! Risk tiers and class probability vectors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// Number of risk tiers the classifier predicts
pub const NUM_CLASSES: usize = 3;

/// Risk tier, ordered by increasing severity.
///
/// Serialized as its integer index (0, 1, 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RiskClass {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl RiskClass {
    /// All classes in index order
    pub const ALL: [RiskClass; NUM_CLASSES] = [RiskClass::Low, RiskClass::Medium, RiskClass::High];

    /// Class index into logits and probability vectors
    pub fn index(self) -> usize {
        self as usize
    }

    /// Class for a logit index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            RiskClass::Low => "Low Risk (Benign)",
            RiskClass::Medium => "Medium Risk (Pre-cancer / Watch)",
            RiskClass::High => "High Risk (Malignant / Urgent)",
        }
    }

    /// Traffic-light marker shown in front of the label
    pub fn marker(self) -> &'static str {
        match self {
            RiskClass::Low => "🟢",
            RiskClass::Medium => "🟡",
            RiskClass::High => "🔴",
        }
    }

    /// Marker and label, e.g. "🟢 Low Risk (Benign)"
    pub fn prediction(self) -> String {
        format!("{} {}", self.marker(), self.label())
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<RiskClass> for u8 {
    fn from(class: RiskClass) -> Self {
        class as u8
    }
}

impl TryFrom<u8> for RiskClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RiskClass::from_index(value as usize).ok_or_else(|| format!("invalid risk level: {value}"))
    }
}

/// Class probabilities indexed by [`RiskClass`].
///
/// Normalized whenever it leaves the engine; intermediate values may not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProbabilityVector([f64; NUM_CLASSES]);

impl ProbabilityVector {
    pub fn new(low: f64, medium: f64, high: f64) -> Self {
        Self([low, medium, high])
    }

    pub fn from_array(values: [f64; NUM_CLASSES]) -> Self {
        Self(values)
    }

    pub fn as_array(&self) -> [f64; NUM_CLASSES] {
        self.0
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Divide every entry by the sum. A zero sum leaves the vector unchanged.
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total > 0.0 {
            Self(self.0.map(|p| p / total))
        } else {
            *self
        }
    }

    /// Most probable class; ties go to the lower-severity class.
    pub fn argmax(&self) -> RiskClass {
        let mut best = RiskClass::Low;
        for class in RiskClass::ALL {
            if self[class] > self[best] {
                best = class;
            }
        }
        best
    }
}

impl Index<RiskClass> for ProbabilityVector {
    type Output = f64;

    fn index(&self, class: RiskClass) -> &f64 {
        &self.0[class.index()]
    }
}

impl IndexMut<RiskClass> for ProbabilityVector {
    fn index_mut(&mut self, class: RiskClass) -> &mut f64 {
        &mut self.0[class.index()]
    }
}
