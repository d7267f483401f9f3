use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in pixel coordinates of the source image.
///
/// Coordinates come straight from the detector and may lie outside the image
/// (the network can predict slightly negative or >1.0 normalized values).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Gender classes in network output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

/// Age brackets in network output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBracket {
    Infant,
    EarlyChild,
    Child,
    Teen,
    YoungAdult,
    Adult,
    MiddleAge,
    Senior,
    Elder,
}

impl AgeBracket {
    pub const ALL: [AgeBracket; 9] = [
        AgeBracket::Infant,
        AgeBracket::EarlyChild,
        AgeBracket::Child,
        AgeBracket::Teen,
        AgeBracket::YoungAdult,
        AgeBracket::Adult,
        AgeBracket::MiddleAge,
        AgeBracket::Senior,
        AgeBracket::Elder,
    ];

    /// Label as the age network names it, e.g. `"(25-32)"`.
    pub fn label(&self) -> &'static str {
        match self {
            AgeBracket::Infant => "(0-2)",
            AgeBracket::EarlyChild => "(4-6)",
            AgeBracket::Child => "(8-12)",
            AgeBracket::Teen => "(15-20)",
            AgeBracket::YoungAdult => "(20-25)",
            AgeBracket::Adult => "(25-32)",
            AgeBracket::MiddleAge => "(38-43)",
            AgeBracket::Senior => "(48-53)",
            AgeBracket::Elder => "(60-100)",
        }
    }

    /// Label with the surrounding parentheses removed, e.g. `"25-32"`.
    pub fn range(&self) -> &'static str {
        strip_brackets(self.label())
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

fn strip_brackets(label: &str) -> &str {
    let label = label.strip_prefix('(').unwrap_or(label);
    label.strip_suffix(')').unwrap_or(label)
}

/// Age and gender estimate for a single face crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demographics {
    pub gender: Gender,
    pub age: AgeBracket,
}

/// Successful analysis, serialized as the `/analyze` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub gender: String,
    pub age: String,
    pub emotion: String,
}

impl Analysis {
    pub fn new(demographics: Demographics, emotion: impl Into<String>) -> Self {
        Self {
            gender: demographics.gender.as_str().to_string(),
            age: demographics.age.range().to_string(),
            emotion: emotion.into(),
        }
    }
}
