use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{constants::*, error::CommonError, source::PotentialSource};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TomlParameters {
    /// Name of simulation (used for output directories)
    pub sim_name: String,

    /// Voxel size of the unbinned volume in Å
    #[serde(default = "default_pixel_size")]
    pub pixel_size: f64,
    /// Transverse bin factor relating the volume on disk to the unbinned voxel grid
    #[serde(default = "default_bin_factor_xy")]
    pub bin_factor_xy: usize,
    /// Bin factor along the beam direction
    #[serde(default = "default_bin_factor_z")]
    pub bin_factor_z: usize,
    /// Whether the volume on disk is already binned. If false, it is binned on load.
    #[serde(default = "default_true")]
    pub prebinned: bool,
    /// Overrides `pixel_size * bin_factor_z`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_thickness: Option<f64>,

    /// Electron wavelength in Å
    #[serde(default = "default_wavelength")]
    pub wavelength: f64,
    /// Interaction constant in 1/V
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Objective aperture semiangle in mrad
    #[serde(default = "default_semiangle_cutoff")]
    pub semiangle_cutoff: f64,
    /// Objective aperture edge width in mrad
    #[serde(default = "default_rolloff")]
    pub rolloff: f64,
    /// Beam tilt (x, y) in mrad
    #[serde(default = "default_tilt")]
    pub tilt: Vec<f64>,

    /// Defocus in µm
    #[serde(default)]
    pub defocus: f64,
    /// If present, one simulation is run per defocus value and `defocus` is ignored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defocus_series: Option<Vec<f64>>,
    /// Incident dose in e/Å^2
    #[serde(default = "default_dose")]
    pub dose: f64,
    /// Also form an image with a Zernike phase plate
    #[serde(default)]
    pub zernike: bool,
    /// One noise realisation is drawn per seed
    #[serde(
        default = "default_seeds",
        deserialize_with = "deserialize_seeds",
        serialize_with = "serialize_seeds"
    )]
    pub seeds: Vec<u64>,

    /// Root directory for outputs
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Whether to dump the complex exit wave
    #[serde(default)]
    pub write_exit_wave: bool,
    /// Scale bar length in pixels
    #[serde(default = "default_scalebar_length")]
    pub scalebar_length: usize,

    /// Where the potential volume comes from
    #[serde(default)]
    pub source: PotentialSource,
}

/// Slice thickness and transverse sampling of the binned potential, in Å
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub slice_thickness: f64,
    pub sampling: (f64, f64),
}

impl TomlParameters {
    /// Resolves the binned voxel geometry. An explicit `slice_thickness` wins over
    /// `pixel_size * bin_factor_z`.
    pub fn geometry(&self) -> Geometry {
        let transverse = self.pixel_size * self.bin_factor_xy as f64;
        Geometry {
            slice_thickness: self
                .slice_thickness
                .unwrap_or(self.pixel_size * self.bin_factor_z as f64),
            sampling: (transverse, transverse),
        }
    }

    /// Beam tilt as a pair, or None when both components are absent
    pub fn tilt(&self) -> Option<(f64, f64)> {
        match self.tilt.as_slice() {
            [] => None,
            [tx, ty] => Some((*tx, *ty)),
            _ => None,
        }
    }

    /// Defocus values to simulate, in µm
    pub fn defocus_values(&self) -> Vec<f64> {
        self.defocus_series
            .clone()
            .unwrap_or_else(|| vec![self.defocus])
    }

    pub fn validate(&self) -> Result<(), CommonError> {
        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(CommonError::InvalidParameter {
                    name,
                    msg: format!("expected a positive finite value, got {value}"),
                })
            }
        };
        positive("pixel_size", self.pixel_size)?;
        positive("wavelength", self.wavelength)?;
        positive("dose", self.dose)?;
        positive("semiangle_cutoff", self.semiangle_cutoff)?;
        if let Some(thickness) = self.slice_thickness {
            positive("slice_thickness", thickness)?;
        }
        if self.bin_factor_xy == 0 || self.bin_factor_z == 0 {
            return Err(CommonError::InvalidParameter {
                name: "bin_factor",
                msg: "bin factors must be at least 1".to_string(),
            });
        }
        if !(self.tilt.is_empty() || self.tilt.len() == 2) {
            return Err(CommonError::InvalidParameter {
                name: "tilt",
                msg: format!("expected two components, got {}", self.tilt.len()),
            });
        }
        if self.seeds.is_empty() {
            return Err(CommonError::InvalidParameter {
                name: "seeds",
                msg: "at least one seed is required".to_string(),
            });
        }
        if let Some(series) = &self.defocus_series {
            if series.is_empty() || series.iter().any(|d| !d.is_finite()) {
                return Err(CommonError::InvalidParameter {
                    name: "defocus_series",
                    msg: format!("expected finite values, got {series:?}"),
                });
            }
        }
        Ok(())
    }
}

/// This function reads toml files
pub fn read_toml(path: &str) -> Result<TomlParameters, CommonError> {
    // Read toml config file
    let toml_contents: &str =
        &std::fs::read_to_string(path).map_err(|_| CommonError::TomlReadError {
            path: path.to_string(),
        })?;

    // Return parsed toml from str
    parse_toml(toml_contents)
}

pub fn parse_toml(contents: &str) -> Result<TomlParameters, CommonError> {
    let toml: TomlParameters = toml::from_str(contents).map_err(|e| CommonError::TomlParseError {
        msg: format!("{e:?}"),
    })?;
    toml.validate()?;
    Ok(toml)
}

/// Defocus values offered by the interactive control, in µm
pub fn defocus_steps() -> Vec<f64> {
    let (low, high) = DEFOCUS_RANGE;
    let n = ((high - low) / DEFOCUS_STEP).round() as usize;
    (0..=n).map(|i| low + i as f64 * DEFOCUS_STEP).collect()
}

/// Log-spaced dose values offered by the interactive control, in e/Å^2
pub fn dose_steps() -> Vec<f64> {
    let (low, high) = DOSE_LOG10_RANGE;
    let step = (high - low) / (DOSE_STEPS - 1) as f64;
    (0..DOSE_STEPS)
        .map(|i| 10f64.powf(low + i as f64 * step))
        .collect()
}

fn default_pixel_size() -> f64 {
    PIXEL_SIZE
}
fn default_bin_factor_xy() -> usize {
    BIN_FACTOR_XY
}
fn default_bin_factor_z() -> usize {
    BIN_FACTOR_Z
}
fn default_true() -> bool {
    true
}
fn default_wavelength() -> f64 {
    WAVELENGTH
}
fn default_sigma() -> f64 {
    SIGMA
}
fn default_semiangle_cutoff() -> f64 {
    SEMIANGLE_CUTOFF
}
fn default_rolloff() -> f64 {
    ROLLOFF
}
fn default_tilt() -> Vec<f64> {
    vec![0.0, 0.0]
}
fn default_dose() -> f64 {
    DOSE
}
fn default_seeds() -> Vec<u64> {
    vec![0]
}
fn default_output_dir() -> String {
    "sim-data".to_string()
}
fn default_scalebar_length() -> usize {
    30
}

fn deserialize_seeds<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let parsed_string = String::deserialize(deserializer)?;
    parse_seeds(&parsed_string).map_err(serde::de::Error::custom)
}

fn serialize_seeds<S>(seeds: &[u64], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let joined = seeds
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    serializer.serialize_str(&joined)
}

/// NOTE: this compiles the regex internally,
/// so if we ever use this multiple times it will be slow/inefficient.
pub fn parse_seeds(s: &str) -> Result<Vec<u64>, CommonError> {
    let r1 = Regex::new(r"^\s*(\d+)\s*\.\.=\s*(\d+)\s*$").expect("valid regex");
    let r2 = Regex::new(r"^\s*(\d+) to (\d+)\s*$").expect("valid regex");
    let r3 = Regex::new(r"^\s*\[?\s*\d+(\s*,\s*\d+)*\s*,?\s*\]?\s*$").expect("valid regex");
    let digits = Regex::new(r"\d+").expect("valid regex");

    let parse = |x: &str| {
        x.parse::<u64>().map_err(|e| CommonError::SeedParseError {
            msg: format!("{x}: {e}"),
        })
    };

    // Range Inclusive (a..=b) and custom syntax (a to b)
    if let Some(captures) = r1.captures(s).or_else(|| r2.captures(s)) {
        let start = parse(&captures[1])?;
        let end = parse(&captures[2])?;
        if start > end {
            return Err(CommonError::SeedParseError {
                msg: format!("empty range {start}..={end}"),
            });
        }
        return Ok((start..=end).collect());
    }

    // Comma separated digits
    if r3.is_match(s) {
        return digits.find_iter(s).map(|m| parse(m.as_str())).collect();
    }

    Err(CommonError::SeedParseError {
        msg: format!(
            "{s:?} did not match expected patterns: low..=high, low to high, [s1, s2, s3]"
        ),
    })
}

#[test]
fn test_regex_range_inclusive() {
    let sample = "0..=55";
    let seeds = parse_seeds(sample);
    assert_eq!(seeds, Ok((0..=55).collect()));
}

#[test]
fn test_regex_to() {
    let sample = "0 to 55";
    let seeds = parse_seeds(sample);
    assert_eq!(seeds, Ok((0..=55).collect()));
}

#[test]
fn test_regex_comma_separated() {
    let sample = "[1, 3]";
    let seeds = parse_seeds(sample);
    assert_eq!(seeds, Ok(vec![1, 3]));

    let sample = "1, 3";
    let seeds = parse_seeds(sample);
    assert_eq!(seeds, Ok(vec![1, 3]));

    let sample = "7";
    let seeds = parse_seeds(sample);
    assert_eq!(seeds, Ok(vec![7]));
}

#[test]
fn test_regex_rejects_garbage() {
    assert!(parse_seeds("seven").is_err());
    assert!(parse_seeds("5..=2").is_err());
}

#[test]
fn test_defaults_from_minimal_toml() {
    let toml = parse_toml(r#"sim_name = "apoF""#).unwrap();
    assert_eq!(toml.pixel_size, PIXEL_SIZE);
    assert_eq!(toml.bin_factor_xy, 2);
    assert_eq!(toml.bin_factor_z, 6);
    assert!(toml.prebinned);
    assert_eq!(toml.wavelength, WAVELENGTH);
    assert_eq!(toml.sigma, SIGMA);
    assert_eq!(toml.seeds, vec![0]);
    assert_eq!(toml.tilt(), Some((0.0, 0.0)));
    assert_eq!(toml.defocus_values(), vec![0.0]);
    assert_eq!(toml.source, PotentialSource::default());

    let geometry = toml.geometry();
    assert!((geometry.slice_thickness - 4.0).abs() < 1e-12);
    assert!((geometry.sampling.0 - 4.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_full_toml() {
    let toml = parse_toml(
        r#"
        sim_name = "series"
        defocus_series = [-1.0, 0.0, 1.0]
        dose = 100.0
        zernike = true
        seeds = "3 to 5"
        slice_thickness = 2.5

        [source]
        type = "Remote"
        cache_dir = "cache"
        "#,
    )
    .unwrap();
    assert_eq!(toml.defocus_values(), vec![-1.0, 0.0, 1.0]);
    assert_eq!(toml.seeds, vec![3, 4, 5]);
    assert!(toml.zernike);
    assert_eq!(toml.geometry().slice_thickness, 2.5);
    assert_eq!(
        toml.source,
        PotentialSource::Remote {
            url: REMOTE_DATA_URL.to_string(),
            file_name: DATA_FILE_NAME.to_string(),
            cache_dir: "cache".to_string(),
            overwrite: false,
        }
    );
}

#[test]
fn test_invalid_parameters_are_rejected() {
    let err = parse_toml("sim_name = \"x\"\ndose = 0.0").unwrap_err();
    assert!(matches!(err, CommonError::InvalidParameter { name: "dose", .. }));

    let err = parse_toml("sim_name = \"x\"\nbin_factor_z = 0").unwrap_err();
    assert!(matches!(err, CommonError::InvalidParameter { .. }));

    let err = parse_toml("sim_name = \"x\"\ntilt = [1.0]").unwrap_err();
    assert!(matches!(err, CommonError::InvalidParameter { name: "tilt", .. }));

    assert!(matches!(
        parse_toml("sim_name = 3").unwrap_err(),
        CommonError::TomlParseError { .. }
    ));
}

#[test]
fn test_slider_steps() {
    let defocus = defocus_steps();
    assert_eq!(defocus.len(), 81);
    assert_eq!(defocus[0], -2.0);
    assert!((defocus[80] - 2.0).abs() < 1e-12);

    let dose = dose_steps();
    assert_eq!(dose.len(), 10);
    assert!((dose[0] - 10.0).abs() < 1e-9);
    assert!((dose[9] - 1000.0).abs() < 1e-9);
}

#[test]
fn test_shipped_config() {
    let toml = parse_toml(include_str!("../../configs/apoF.toml")).unwrap();
    assert_eq!(toml.seeds, vec![0, 1, 2, 3]);
    assert!(toml.zernike);
    assert_eq!(
        toml.source.local_path(),
        std::path::PathBuf::from("data").join(DATA_FILE_NAME)
    );
}

#[test]
fn test_toml_round_trip() {
    let toml = parse_toml(include_str!("../../configs/apoF.toml")).unwrap();
    let serialized = toml::to_string(&toml).unwrap();
    assert!(serialized.contains(r#"seeds = "0, 1, 2, 3""#));
    assert_eq!(parse_toml(&serialized).unwrap(), toml);

    // defaults survive the trip too
    let minimal = parse_toml(r#"sim_name = "apoF""#).unwrap();
    let serialized = toml::to_string(&minimal).unwrap();
    assert_eq!(parse_toml(&serialized).unwrap(), minimal);
}
