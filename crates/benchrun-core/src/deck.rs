use crate::error::{BenchError, Result};
use crate::geometry::VesselGeometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Mount
// ---------------------------------------------------------------------------

/// One physical pipetting actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mount {
    Left,
    Right,
}

impl Mount {
    pub fn other(self) -> Mount {
        match self {
            Mount::Left => Mount::Right,
            Mount::Right => Mount::Left,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mount::Left => "left",
            Mount::Right => "right",
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Mount {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "left" => Ok(Mount::Left),
            "right" => Ok(Mount::Right),
            _ => Err(BenchError::UnknownMount(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A well on a piece of labware, written `labware:well` (e.g. `plate:A1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Location {
    pub labware: String,
    pub well: String,
}

impl Location {
    pub fn new(labware: impl Into<String>, well: impl Into<String>) -> Self {
        Self {
            labware: labware.into(),
            well: well.into(),
        }
    }

    /// Zero-based `(row, column)` of the well, `A1` → `(0, 0)`.
    pub fn row_col(&self) -> Option<(u32, u32)> {
        let mut chars = self.well.chars();
        let row = chars.next()?;
        if !row.is_ascii_uppercase() {
            return None;
        }
        let col: u32 = chars.as_str().parse().ok()?;
        if col == 0 {
            return None;
        }
        Some((row as u32 - 'A' as u32, col - 1))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.labware, self.well)
    }
}

impl std::str::FromStr for Location {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((labware, well)) if !labware.is_empty() && !well.is_empty() => {
                Ok(Location::new(labware, well))
            }
            _ => Err(BenchError::UnresolvedLocation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Location {
    type Error = BenchError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Location> for String {
    fn from(loc: Location) -> String {
        loc.to_string()
    }
}

// ---------------------------------------------------------------------------
// Labware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabwareKind {
    TipRack,
    Plate,
    Reservoir,
    TubeRack,
    Trash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Labware {
    pub name: String,
    pub slot: u8,
    pub kind: LabwareKind,
    /// Top of the labware above the deck, mm.
    pub height_mm: f64,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default = "default_columns")]
    pub columns: u32,
    /// Well shape, needed for fill-level depth of reagent sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<VesselGeometry>,
}

fn default_rows() -> u32 {
    8
}

fn default_columns() -> u32 {
    12
}

/// Rows are lettered `A` to `Z`.
pub const MAX_ROWS: u32 = 26;

impl Labware {
    /// Rows must fit the single-letter well names, columns start at 1.
    pub fn check_shape(&self) -> Result<()> {
        if self.rows == 0 || self.rows > MAX_ROWS || self.columns == 0 {
            return Err(BenchError::InvalidLabware {
                name: self.name.clone(),
                reason: format!(
                    "{} rows x {} columns (rows must be 1-{MAX_ROWS}, columns >= 1)",
                    self.rows, self.columns
                ),
            });
        }
        Ok(())
    }

    /// Well names in column-major order (`A1, B1, ... H1, A2, ...`), the
    /// order single-channel tips are drawn from a rack.
    pub fn wells(&self) -> Result<Vec<String>> {
        self.check_shape()?;
        let mut wells = Vec::new();
        for col in 1..=self.columns {
            for letter in ('A'..='Z').take(self.rows as usize) {
                wells.push(format!("{letter}{col}"));
            }
        }
        Ok(wells)
    }

    pub fn has_well(&self, well: &str) -> bool {
        let loc = Location::new(self.name.clone(), well);
        matches!(loc.row_col(), Some((r, c)) if r < self.rows && c < self.columns)
    }
}

// ---------------------------------------------------------------------------
// Deck
// ---------------------------------------------------------------------------

/// Loaded labware plus the named locations protocols refer to symbolically.
#[derive(Debug, Clone, Default)]
pub struct Deck {
    labware: Vec<Labware>,
    named: BTreeMap<String, Location>,
}

impl Deck {
    pub fn new(labware: Vec<Labware>, named: BTreeMap<String, Location>) -> Self {
        Self { labware, named }
    }

    pub fn labware(&self, name: &str) -> Result<&Labware> {
        self.labware
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| BenchError::UnknownLabware(name.to_string()))
    }

    pub fn all_labware(&self) -> &[Labware] {
        &self.labware
    }

    /// Height of the tallest loaded labware; the safe travel floor for an
    /// idle actuator.
    pub fn tallest_mm(&self) -> f64 {
        self.labware
            .iter()
            .map(|l| l.height_mm)
            .fold(0.0, f64::max)
    }

    /// Resolve a named location such as `trash` or `beads`.
    pub fn resolve(&self, name: &str) -> Result<&Location> {
        self.named
            .get(name)
            .ok_or_else(|| BenchError::UnresolvedLocation(name.to_string()))
    }

    /// Check that `loc` names loaded labware and a well that exists on it.
    pub fn check(&self, loc: &Location) -> Result<()> {
        let lw = self.labware(&loc.labware)?;
        if !lw.has_well(&loc.well) {
            return Err(BenchError::UnresolvedLocation(loc.to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
