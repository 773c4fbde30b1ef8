//! Boundary-condition records loaded from the realm configuration.
//!
//! Each YAML node carries exactly one `<kind>_boundary_condition: <name>` key,
//! a `target_name` and an optional `<kind>_user_data` map. Kinds are tried in
//! a fixed order and the first present key decides the record type.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no such bc type in node:\n{context}")]
    UnknownBoundaryCondition { context: String },
    #[error("{kind} boundary condition is missing `{key}` in node:\n{context}")]
    MissingKey {
        kind: BcKind,
        key: &'static str,
        context: String,
    },
    #[error("{kind} boundary condition needs {expected} target names in node:\n{context}")]
    InvalidTarget {
        kind: BcKind,
        expected: usize,
        context: String,
    },
    #[error("{kind} boundary condition: {source} in node:\n{context}")]
    Parse {
        kind: BcKind,
        context: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("boundary condition `{bc}` targets unknown part `{part}`")]
    UnknownPart { bc: String, part: String },
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Boundary-condition kinds in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcKind {
    Wall,
    Inflow,
    Open,
    Symmetry,
    AblTop,
    Periodic,
    NonConformal,
    Overset,
}

impl BcKind {
    pub const ALL: [BcKind; 8] = [
        BcKind::Wall,
        BcKind::Inflow,
        BcKind::Open,
        BcKind::Symmetry,
        BcKind::AblTop,
        BcKind::Periodic,
        BcKind::NonConformal,
        BcKind::Overset,
    ];

    fn prefix(self) -> &'static str {
        match self {
            BcKind::Wall => "wall",
            BcKind::Inflow => "inflow",
            BcKind::Open => "open",
            BcKind::Symmetry => "symmetry",
            BcKind::AblTop => "abltop",
            BcKind::Periodic => "periodic",
            BcKind::NonConformal => "non_conformal",
            BcKind::Overset => "overset",
        }
    }

    pub fn key(self) -> String {
        format!("{}_boundary_condition", self.prefix())
    }

    pub fn user_data_key(self) -> String {
        format!("{}_user_data", self.prefix())
    }

    /// Number of target parts the kind requires, `None` when any count works.
    fn target_count(self) -> Option<usize> {
        match self {
            BcKind::Periodic | BcKind::NonConformal => Some(2),
            BcKind::Overset => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for BcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BcKind::Wall => "Wall",
            BcKind::Inflow => "Inflow",
            BcKind::Open => "Open",
            BcKind::Symmetry => "Symmetry",
            BcKind::AblTop => "ABLTop",
            BcKind::Periodic => "Periodic",
            BcKind::NonConformal => "NonConformal",
            BcKind::Overset => "Overset",
        };
        f.write_str(label)
    }
}

/// `target_name` may be one part or a list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetName {
    Single(String),
    Many(Vec<String>),
}

impl Default for TargetName {
    fn default() -> Self {
        TargetName::Many(Vec::new())
    }
}

impl TargetName {
    pub fn parts(&self) -> Vec<&str> {
        match self {
            TargetName::Single(s) => vec![s.as_str()],
            TargetName::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.parts().join(", "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WallUserData {
    pub temperature: Option<f64>,
    pub heat_flux: Option<f64>,
    pub emissivity: Option<f64>,
    pub irradiation: Option<f64>,
    #[serde(default)]
    pub adiabatic: bool,
}

impl WallUserData {
    /// A wall with both emissivity and irradiation radiates.
    pub fn is_irradiating(&self) -> bool {
        self.emissivity.is_some() && self.irradiation.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InflowUserData {
    pub velocity: Option<[f64; 3]>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenUserData {
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymmetryUserData {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AblTopUserData {
    pub normal_temperature_gradient: Option<f64>,
    #[serde(default)]
    pub potential_flow_bc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodicUserData {
    #[serde(default = "default_search_tolerance")]
    pub search_tolerance: f64,
    #[serde(default = "default_search_method")]
    pub search_method: String,
}

fn default_search_tolerance() -> f64 {
    1.0e-8
}

fn default_search_method() -> String {
    "stk_kdtree".to_string()
}

impl Default for PeriodicUserData {
    fn default() -> Self {
        Self {
            search_tolerance: default_search_tolerance(),
            search_method: default_search_method(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonConformalUserData {
    #[serde(default)]
    pub expand_box_percentage: f64,
}

/// Nodes inside the axis-aligned hole box are blanked out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OversetUserData {
    pub hole_min: [f64; 3],
    pub hole_max: [f64; 3],
}

impl OversetUserData {
    pub fn contains(&self, x: [f64; 3]) -> bool {
        (0..3).all(|d| self.hole_min[d] <= x[d] && x[d] <= self.hole_max[d])
    }
}

/// Name, target and typed user data of one loaded boundary condition.
#[derive(Debug, Clone, PartialEq)]
pub struct BcRecord<U> {
    pub name: String,
    pub target: TargetName,
    pub user_data: U,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryCondition {
    Wall(BcRecord<WallUserData>),
    Inflow(BcRecord<InflowUserData>),
    Open(BcRecord<OpenUserData>),
    Symmetry(BcRecord<SymmetryUserData>),
    AblTop(BcRecord<AblTopUserData>),
    Periodic(BcRecord<PeriodicUserData>),
    NonConformal(BcRecord<NonConformalUserData>),
    Overset(BcRecord<OversetUserData>),
}

impl BoundaryCondition {
    /// Build the record selected by the first boundary-condition key present
    /// in `node`.
    pub fn load(node: &Value) -> Result<Self, ConfigError> {
        let kind = BcKind::ALL
            .into_iter()
            .find(|k| node.get(k.key()).is_some())
            .ok_or_else(|| ConfigError::UnknownBoundaryCondition {
                context: context(node),
            })?;

        let bc = match kind {
            BcKind::Wall => BoundaryCondition::Wall(parse_record(node, kind)?),
            BcKind::Inflow => BoundaryCondition::Inflow(parse_record(node, kind)?),
            BcKind::Open => BoundaryCondition::Open(parse_record(node, kind)?),
            BcKind::Symmetry => BoundaryCondition::Symmetry(parse_record(node, kind)?),
            BcKind::AblTop => BoundaryCondition::AblTop(parse_record(node, kind)?),
            BcKind::Periodic => BoundaryCondition::Periodic(parse_record(node, kind)?),
            BcKind::NonConformal => BoundaryCondition::NonConformal(parse_record(node, kind)?),
            BcKind::Overset => BoundaryCondition::Overset(parse_record(node, kind)?),
        };

        match &bc {
            BoundaryCondition::Periodic(r) => {
                let parts = r.target.parts();
                log::info!("{kind} BC name: {} between {} and {}", r.name, parts[0], parts[1]);
            }
            BoundaryCondition::NonConformal(r) => {
                log::info!("{kind} BC name: {} using {}", r.name, r.target)
            }
            BoundaryCondition::Overset(r) => log::info!("{kind} BC name: {}", r.name),
            _ => log::info!("{kind} BC name: {} on {}", bc.name(), bc.target()),
        }
        Ok(bc)
    }

    pub fn kind(&self) -> BcKind {
        match self {
            BoundaryCondition::Wall(_) => BcKind::Wall,
            BoundaryCondition::Inflow(_) => BcKind::Inflow,
            BoundaryCondition::Open(_) => BcKind::Open,
            BoundaryCondition::Symmetry(_) => BcKind::Symmetry,
            BoundaryCondition::AblTop(_) => BcKind::AblTop,
            BoundaryCondition::Periodic(_) => BcKind::Periodic,
            BoundaryCondition::NonConformal(_) => BcKind::NonConformal,
            BoundaryCondition::Overset(_) => BcKind::Overset,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BoundaryCondition::Wall(r) => &r.name,
            BoundaryCondition::Inflow(r) => &r.name,
            BoundaryCondition::Open(r) => &r.name,
            BoundaryCondition::Symmetry(r) => &r.name,
            BoundaryCondition::AblTop(r) => &r.name,
            BoundaryCondition::Periodic(r) => &r.name,
            BoundaryCondition::NonConformal(r) => &r.name,
            BoundaryCondition::Overset(r) => &r.name,
        }
    }

    pub fn target(&self) -> &TargetName {
        match self {
            BoundaryCondition::Wall(r) => &r.target,
            BoundaryCondition::Inflow(r) => &r.target,
            BoundaryCondition::Open(r) => &r.target,
            BoundaryCondition::Symmetry(r) => &r.target,
            BoundaryCondition::AblTop(r) => &r.target,
            BoundaryCondition::Periodic(r) => &r.target,
            BoundaryCondition::NonConformal(r) => &r.target,
            BoundaryCondition::Overset(r) => &r.target,
        }
    }
}

fn context(node: &Value) -> String {
    serde_yaml::to_string(node).unwrap_or_default()
}

fn parse_record<U>(node: &Value, kind: BcKind) -> Result<BcRecord<U>, ConfigError>
where
    U: DeserializeOwned + Default,
{
    let parse_err = |source| ConfigError::Parse {
        kind,
        context: context(node),
        source,
    };

    let name = match node.get(kind.key()) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_yaml::to_string(other)
            .map_err(parse_err)?
            .trim()
            .to_string(),
        None => {
            return Err(ConfigError::MissingKey {
                kind,
                key: "name",
                context: context(node),
            })
        }
    };

    let target = match node.get("target_name") {
        Some(v) => serde_yaml::from_value::<TargetName>(v.clone()).map_err(parse_err)?,
        None if kind == BcKind::Overset => TargetName::default(),
        None => {
            return Err(ConfigError::MissingKey {
                kind,
                key: "target_name",
                context: context(node),
            })
        }
    };
    if let Some(expected) = kind.target_count() {
        let found = target.parts().len();
        if expected > 0 && found != expected {
            return Err(ConfigError::InvalidTarget {
                kind,
                expected,
                context: context(node),
            });
        }
    }

    let user_data = match node.get(kind.user_data_key()) {
        Some(Value::Null) | None => U::default(),
        Some(v) => serde_yaml::from_value(v.clone()).map_err(parse_err)?,
    };

    Ok(BcRecord {
        name,
        target,
        user_data,
    })
}

/// Owner of every loaded boundary condition of a realm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundaryConditions {
    bcs: Vec<BoundaryCondition>,
}

impl BoundaryConditions {
    /// Load one node and move the record into the collection.
    /// Nothing is added when loading fails.
    pub fn load_into(&mut self, node: &Value) -> Result<&BoundaryCondition, ConfigError> {
        let bc = BoundaryCondition::load(node)?;
        self.bcs.push(bc);
        Ok(&self.bcs[self.bcs.len() - 1])
    }

    /// Load a whole list, failing on the first bad node.
    pub fn load_all(nodes: &[Value]) -> Result<Self, ConfigError> {
        let mut bcs = Self::default();
        for node in nodes {
            bcs.load_into(node)?;
        }
        Ok(bcs)
    }

    pub fn len(&self) -> usize {
        self.bcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bcs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundaryCondition> {
        self.bcs.iter()
    }

    /// Records whose target includes `part`.
    pub fn for_target<'a>(&'a self, part: &'a str) -> impl Iterator<Item = &'a BoundaryCondition> {
        self.bcs
            .iter()
            .filter(move |bc| bc.target().parts().contains(&part))
    }
}
