//! SWC morphology import.
//!
//! Points are grouped into unbranched runs of the same structure type. Each run
//! becomes one section, named after its type with a per-type index
//! (`soma[0]`, `dend[3]`, ...).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{ExternalError, LookupError, ModelResult, TypeMismatch, ValidationError};

/// Structure type column of an SWC record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwcType {
    /// Type 1.
    Soma,
    /// Type 2.
    Axon,
    /// Type 3 and any custom type.
    Dend,
    /// Type 4.
    Apic,
}

impl SwcType {
    fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Soma,
            2 => Self::Axon,
            4 => Self::Apic,
            _ => Self::Dend,
        }
    }

    /// Base section name for this type.
    #[must_use]
    pub const fn base_name(self) -> &'static str {
        match self {
            Self::Soma => "soma",
            Self::Axon => "axon",
            Self::Dend => "dend",
            Self::Apic => "apic",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SwcPoint {
    kind: SwcType,
    xyz: [f64; 3],
    radius: f64,
    parent: Option<usize>,
}

/// One section produced by the importer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedSection {
    /// Engine-level name, eg. `dend[2]`.
    pub name: String,
    /// Structure type.
    pub kind: SwcType,
    /// Length in um.
    pub length: f64,
    /// Mean diameter in um.
    pub diam: f64,
    /// Parent section index in the returned list and the location on it.
    pub parent: Option<(usize, f64)>,
}

fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

fn parse_points(source: &str) -> ModelResult<Vec<SwcPoint>> {
    let mut points = Vec::new();
    let mut index_of: HashMap<i64, usize> = HashMap::new();

    for (lineno, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let invalid = |reason: String| ValidationError::InvalidMorphology {
            line: lineno + 1,
            reason,
        };

        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 7 {
            return Err(invalid(format!("expected 7 columns, found {}", cols.len())).into());
        }
        let int = |s: &str| {
            s.parse::<i64>()
                .map_err(|e| invalid(format!("'{s}' is not an integer: {e}")))
        };
        let float = |s: &str| {
            s.parse::<f64>()
                .map_err(|e| invalid(format!("'{s}' is not a number: {e}")))
        };

        let id = int(cols[0])?;
        let kind = SwcType::from_code(int(cols[1])?);
        let xyz = [float(cols[2])?, float(cols[3])?, float(cols[4])?];
        let radius = float(cols[5])?;
        let parent_id = int(cols[6])?;

        if !(radius >= 0.0 && radius.is_finite()) {
            return Err(invalid(format!("radius must be finite and >= 0, got {radius}")).into());
        }
        let parent = if parent_id < 0 {
            None
        } else {
            Some(
                *index_of
                    .get(&parent_id)
                    .ok_or_else(|| invalid(format!("parent {parent_id} is not defined before point {id}")))?,
            )
        };
        if index_of.insert(id, points.len()).is_some() {
            return Err(invalid(format!("point {id} is defined twice")).into());
        }
        points.push(SwcPoint {
            kind,
            xyz,
            radius,
            parent,
        });
    }

    if points.is_empty() {
        return Err(ValidationError::InvalidMorphology {
            line: 0,
            reason: "no points".to_string(),
        }
        .into());
    }
    Ok(points)
}

#[derive(Debug, Default)]
struct Run {
    kind: Option<SwcType>,
    length: f64,
    diam_sum: f64,
    points: usize,
    last_xyz: [f64; 3],
    parent: Option<(usize, f64)>,
}

/// Parses SWC text into sections.
pub fn parse_swc(source: &str) -> ModelResult<Vec<ImportedSection>> {
    let points = parse_points(source)?;

    let mut children = vec![0usize; points.len()];
    for p in &points {
        if let Some(parent) = p.parent {
            children[parent] += 1;
        }
    }

    let mut runs: Vec<Run> = Vec::new();
    let mut run_of_point: Vec<usize> = Vec::with_capacity(points.len());

    for point in &points {
        let continues = point.parent.and_then(|parent| {
            let parent_point = &points[parent];
            let same_kind = parent_point.kind == point.kind;
            (same_kind && (children[parent] == 1 || point.kind == SwcType::Soma))
                .then(|| run_of_point[parent])
        });

        let run_index = if let Some(run_index) = continues {
            run_index
        } else {
            let parent = point.parent.map(|parent| {
                let parent_run = run_of_point[parent];
                let at = if points[parent].kind == SwcType::Soma { 0.5 } else { 1.0 };
                (parent_run, at)
            });
            runs.push(Run {
                kind: Some(point.kind),
                parent,
                ..Run::default()
            });
            runs.len() - 1
        };

        let run = &mut runs[run_index];
        if let Some(parent) = point.parent {
            let parent_point = &points[parent];
            let joins_soma = parent_point.kind == SwcType::Soma && point.kind != SwcType::Soma;
            if !joins_soma {
                let from = if run.points == 0 { parent_point.xyz } else { run.last_xyz };
                run.length += distance(from, point.xyz);
            }
        }
        run.diam_sum += 2.0 * point.radius;
        run.points += 1;
        run.last_xyz = point.xyz;
        run_of_point.push(run_index);
    }

    let mut counters: HashMap<SwcType, usize> = HashMap::new();
    let mut sections = Vec::with_capacity(runs.len());
    for run in runs {
        let kind = run.kind.unwrap_or(SwcType::Dend);
        let counter = counters.entry(kind).or_insert(0);
        #[allow(clippy::cast_precision_loss)]
        let diam = run.diam_sum / run.points.max(1) as f64;
        let length = if kind == SwcType::Soma && run.length <= 0.0 {
            diam
        } else {
            run.length
        };
        sections.push(ImportedSection {
            name: format!("{}[{}]", kind.base_name(), counter),
            kind,
            length,
            diam,
            parent: run.parent,
        });
        *counter += 1;
    }
    Ok(sections)
}

/// Reads and parses a morphology file.
///
/// Only `.swc` is handled; `.asc` files are recognised but not supported.
pub fn import_file(path: &Path) -> ModelResult<Vec<ImportedSection>> {
    if !path.exists() {
        return Err(LookupError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("swc") => {
            let source = std::fs::read_to_string(path)
                .map_err(|e| ExternalError::io(format!("reading {}", path.display()), &e))?;
            parse_swc(&source)
        }
        _ => Err(TypeMismatch::UnsupportedMorphology {
            path: path.display().to_string(),
        }
        .into()),
    }
}
