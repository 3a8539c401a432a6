use crate::deck::{Deck, Labware, LabwareKind, Location, Mount};
use crate::error::{BenchError, Result};
use crate::geometry::VesselGeometry;
use crate::paths;
use crate::reagent::{DepletablePool, DepthPolicy, ResourceSource};
use crate::tips::ConsumablePool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// DeckConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeckConfig {
    #[serde(default)]
    pub labware: Vec<Labware>,
    /// Symbolic names protocols use instead of concrete wells.
    #[serde(default)]
    pub locations: BTreeMap<String, Location>,
}

// ---------------------------------------------------------------------------
// ConsumablePoolConfig
// ---------------------------------------------------------------------------

/// A pool of disposable tips drawn from one or more racks, in rack order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumablePoolConfig {
    pub name: String,
    pub racks: Vec<String>,
}

// ---------------------------------------------------------------------------
// ReagentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub location: Location,
    /// Starting volume, uL.
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReagentConfig {
    pub name: String,
    pub sources: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Replace timed waits with an operator pause.
    #[serde(default)]
    pub skip_delays: bool,
    /// Kill the process when a stage does not advance for this long.
    #[serde(default = "default_watchdog_minutes")]
    pub watchdog_minutes: u64,
    /// Column distance between wells the two mounts can reach together.
    #[serde(default = "default_pair_offset")]
    pub pair_offset: u32,
    /// Extra height above the tallest labware for the idle mount, mm.
    #[serde(default = "default_safety_clearance")]
    pub safety_clearance_mm: f64,
    #[serde(default = "default_immersion")]
    pub immersion_mm: f64,
    #[serde(default = "default_bottom_clearance")]
    pub bottom_clearance_mm: f64,
    /// Issue a dummy aspirate/dispense before the first real aspirate on
    /// each mount.
    #[serde(default)]
    pub prime_before_aspirate: bool,
}

fn default_watchdog_minutes() -> u64 {
    90
}

fn default_pair_offset() -> u32 {
    1
}

fn default_safety_clearance() -> f64 {
    10.0
}

fn default_immersion() -> f64 {
    DepthPolicy::default().immersion_mm
}

fn default_bottom_clearance() -> f64 {
    DepthPolicy::default().bottom_clearance_mm
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            skip_delays: false,
            watchdog_minutes: default_watchdog_minutes(),
            pair_offset: default_pair_offset(),
            safety_clearance_mm: default_safety_clearance(),
            immersion_mm: default_immersion(),
            bottom_clearance_mm: default_bottom_clearance(),
            prime_before_aspirate: false,
        }
    }
}

impl RunConfig {
    pub fn depth_policy(&self) -> DepthPolicy {
        DepthPolicy {
            immersion_mm: self.immersion_mm,
            bottom_clearance_mm: self.bottom_clearance_mm,
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// LabConfig (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub deck: DeckConfig,
    #[serde(default)]
    pub consumables: Vec<ConsumablePoolConfig>,
    /// Which consumable pool each mount draws from.
    #[serde(default)]
    pub mounts: BTreeMap<Mount, String>,
    #[serde(default)]
    pub reagents: Vec<ReagentConfig>,
    #[serde(default)]
    pub run: RunConfig,
}

fn default_version() -> u32 {
    1
}

impl LabConfig {
    /// Default bench layout for the bead cleanup protocol: one tip rack per
    /// mount, a sample plate, an output plate, a reagent reservoir and trash.
    pub fn new(project_name: impl Into<String>) -> Self {
        let reservoir_well = VesselGeometry::new(8.0, 5.0);
        let labware = vec![
            Labware {
                name: "tips-left".to_string(),
                slot: 1,
                kind: LabwareKind::TipRack,
                height_mm: 64.5,
                rows: 8,
                columns: 12,
                vessel: None,
            },
            Labware {
                name: "tips-right".to_string(),
                slot: 4,
                kind: LabwareKind::TipRack,
                height_mm: 64.5,
                rows: 8,
                columns: 12,
                vessel: None,
            },
            Labware {
                name: "samples".to_string(),
                slot: 2,
                kind: LabwareKind::Plate,
                height_mm: 14.2,
                rows: 8,
                columns: 12,
                vessel: None,
            },
            Labware {
                name: "eluate".to_string(),
                slot: 5,
                kind: LabwareKind::Plate,
                height_mm: 14.2,
                rows: 8,
                columns: 12,
                vessel: None,
            },
            Labware {
                name: "reservoir".to_string(),
                slot: 3,
                kind: LabwareKind::Reservoir,
                height_mm: 31.4,
                rows: 1,
                columns: 12,
                vessel: Some(reservoir_well),
            },
            Labware {
                name: "trash".to_string(),
                slot: 12,
                kind: LabwareKind::Trash,
                height_mm: 82.0,
                rows: 1,
                columns: 1,
                vessel: None,
            },
        ];

        let mut locations = BTreeMap::new();
        locations.insert("trash".to_string(), Location::new("trash", "A1"));
        locations.insert("waste".to_string(), Location::new("reservoir", "A12"));

        let reagent = |name: &str, wells: &[&str], volume: f64| ReagentConfig {
            name: name.to_string(),
            sources: wells
                .iter()
                .map(|w| SourceConfig {
                    location: Location::new("reservoir", *w),
                    volume,
                })
                .collect(),
        };

        let mut mounts = BTreeMap::new();
        mounts.insert(Mount::Left, "left".to_string());
        mounts.insert(Mount::Right, "right".to_string());

        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            deck: DeckConfig { labware, locations },
            consumables: vec![
                ConsumablePoolConfig {
                    name: "left".to_string(),
                    racks: vec!["tips-left".to_string()],
                },
                ConsumablePoolConfig {
                    name: "right".to_string(),
                    racks: vec!["tips-right".to_string()],
                },
            ],
            mounts,
            reagents: vec![
                reagent("beads", &["A1", "A2"], 1800.0),
                reagent("ethanol", &["A3", "A4", "A5", "A6"], 1800.0),
                reagent("elution", &["A7"], 1800.0),
            ],
            run: RunConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(BenchError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: LabConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn deck(&self) -> Deck {
        Deck::new(self.deck.labware.clone(), self.deck.locations.clone())
    }

    /// Consumable pools with unit identities `rack:well`, racks in listed
    /// order and wells column-major within each rack.
    pub fn consumable_pools(&self) -> Result<Vec<ConsumablePool>> {
        let deck = self.deck();
        self.consumables
            .iter()
            .map(|pc| {
                let mut ids = Vec::new();
                for rack in &pc.racks {
                    let lw = deck.labware(rack)?;
                    ids.extend(lw.wells()?.into_iter().map(|w| format!("{}:{w}", lw.name)));
                }
                Ok(ConsumablePool::new(&pc.name, ids))
            })
            .collect()
    }

    pub fn reagent_pools(&self) -> Result<BTreeMap<String, DepletablePool>> {
        let deck = self.deck();
        let depth = self.run.depth_policy();
        let mut pools = BTreeMap::new();
        for rc in &self.reagents {
            if rc.sources.is_empty() {
                return Err(BenchError::UnknownReagent(rc.name.clone()));
            }
            // Each source keeps the shape of the labware it sits on.
            let sources = rc
                .sources
                .iter()
                .map(|s| -> Result<ResourceSource> {
                    let vessel = deck
                        .labware(&s.location.labware)?
                        .vessel
                        .ok_or_else(|| BenchError::UnresolvedLocation(s.location.to_string()))?;
                    Ok(ResourceSource {
                        location: s.location.clone(),
                        vessel,
                        remaining: s.volume,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            pools.insert(rc.name.clone(), DepletablePool::new(&rc.name, depth, sources));
        }
        Ok(pools)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let deck = self.deck();

        // 1. Labware names are unique, valid, and fit the well naming scheme
        let mut seen = HashSet::new();
        for lw in &self.deck.labware {
            if paths::validate_name(&lw.name).is_err() {
                warnings.push(ConfigWarning::error(format!(
                    "labware name '{}' is not a valid name",
                    lw.name
                )));
            }
            if !seen.insert(lw.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "labware '{}' is defined more than once",
                    lw.name
                )));
            }
            if let Err(e) = lw.check_shape() {
                warnings.push(ConfigWarning::error(e.to_string()));
            }
        }

        // 2. Named locations point at real wells
        for (name, loc) in &self.deck.locations {
            if deck.check(loc).is_err() {
                warnings.push(ConfigWarning::error(format!(
                    "location '{name}' points at unknown well {loc}"
                )));
            }
        }

        // 3. Consumable pools reference tip racks
        let mut pool_names = HashSet::new();
        for pc in &self.consumables {
            if !pool_names.insert(pc.name.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "consumable pool '{}' is defined more than once",
                    pc.name
                )));
            }
            if pc.racks.is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "consumable pool '{}' has no racks",
                    pc.name
                )));
            }
            for rack in &pc.racks {
                match deck.labware(rack) {
                    Ok(lw) if lw.kind != LabwareKind::TipRack => {
                        warnings.push(ConfigWarning::warning(format!(
                            "consumable pool '{}' uses '{}', which is not a tip rack",
                            pc.name, rack
                        )));
                    }
                    Ok(_) => {}
                    Err(_) => warnings.push(ConfigWarning::error(format!(
                        "consumable pool '{}' references unknown labware '{}'",
                        pc.name, rack
                    ))),
                }
            }
        }

        // 4. Mount mapping is complete and points at defined pools
        for mount in [Mount::Left, Mount::Right] {
            match self.mounts.get(&mount) {
                Some(pool) if !pool_names.contains(pool.as_str()) => {
                    warnings.push(ConfigWarning::error(format!(
                        "mount '{mount}' maps to unknown consumable pool '{pool}'"
                    )));
                }
                Some(_) => {}
                None => warnings.push(ConfigWarning::warning(format!(
                    "mount '{mount}' has no consumable pool; paired runs need both mounts"
                ))),
            }
        }

        // 5. Reagent sources sit in vessels with a known shape
        for rc in &self.reagents {
            if rc.sources.is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "reagent '{}' has no sources",
                    rc.name
                )));
            }
            for src in &rc.sources {
                if src.volume < 0.0 {
                    warnings.push(ConfigWarning::error(format!(
                        "reagent '{}' source {} has negative volume {}",
                        rc.name, src.location, src.volume
                    )));
                }
                match deck.labware(&src.location.labware) {
                    Ok(lw) if lw.vessel.is_none() => {
                        warnings.push(ConfigWarning::error(format!(
                            "reagent '{}' source {} is on labware without vessel geometry",
                            rc.name, src.location
                        )));
                    }
                    Ok(_) => {}
                    Err(_) => warnings.push(ConfigWarning::error(format!(
                        "reagent '{}' source {} is on unknown labware",
                        rc.name, src.location
                    ))),
                }
            }
        }

        // 6. Run options
        if self.run.watchdog_minutes == 0 {
            warnings.push(ConfigWarning::error(
                "run.watchdog_minutes must be at least 1".to_string(),
            ));
        }
        if self.run.pair_offset == 0 {
            warnings.push(ConfigWarning::warning(
                "run.pair_offset is 0; paired moves will always fall back to serial".to_string(),
            ));
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
