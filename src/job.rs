use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::table::SpatialTable;

/// A source-receptor matrix hosted by the InMAP cloud service.
///
/// This doubles as the model catalog: each variant knows the path of its
/// precomputed data file on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SrMatrix {
    /// The InMAP SR matrix.
    #[serde(rename = "isrm")]
    Isrm,
    /// The APSCA SR matrix, annual average.
    #[serde(rename = "apsca_q0")]
    ApscaQ0,
    /// The APSCA SR matrix, Jan-Mar season.
    #[serde(rename = "apsca_q1")]
    ApscaQ1,
    /// The APSCA SR matrix, Apr-Jun season.
    #[serde(rename = "apsca_q2")]
    ApscaQ2,
    /// The APSCA SR matrix, Jul-Sep season.
    #[serde(rename = "apsca_q3")]
    ApscaQ3,
    /// The APSCA SR matrix, Oct-Dec season.
    #[serde(rename = "apsca_q4")]
    ApscaQ4,
}

impl SrMatrix {
    pub const ALL: [SrMatrix; 6] = [
        SrMatrix::Isrm,
        SrMatrix::ApscaQ0,
        SrMatrix::ApscaQ1,
        SrMatrix::ApscaQ2,
        SrMatrix::ApscaQ3,
        SrMatrix::ApscaQ4,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            SrMatrix::Isrm => "isrm",
            SrMatrix::ApscaQ0 => "apsca_q0",
            SrMatrix::ApscaQ1 => "apsca_q1",
            SrMatrix::ApscaQ2 => "apsca_q2",
            SrMatrix::ApscaQ3 => "apsca_q3",
            SrMatrix::ApscaQ4 => "apsca_q4",
        }
    }

    /// Path of the matrix data file on the cloud service, passed through
    /// verbatim as `--SR.OutputFile`.
    pub fn data_path(&self) -> &'static str {
        match self {
            SrMatrix::Isrm => "/data/isrmv121/isrm_v1.2.1.ncf",
            SrMatrix::ApscaQ0 => "/data/apsca/apsca_sr_Q0_v1.2.1.ncf",
            SrMatrix::ApscaQ1 => "/data/apsca/apsca_sr_Q1_v1.2.1.ncf",
            SrMatrix::ApscaQ2 => "/data/apsca/apsca_sr_Q2_v1.2.1.ncf",
            SrMatrix::ApscaQ3 => "/data/apsca/apsca_sr_Q3_v1.2.1.ncf",
            SrMatrix::ApscaQ4 => "/data/apsca/apsca_sr_Q4_v1.2.1.ncf",
        }
    }

    pub(crate) fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|m| m.id())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SrMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SrMatrix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == s)
            .ok_or_else(|| Error::InvalidModel {
                given: s.to_string(),
                allowed: Self::allowed_list(),
            })
    }
}

/// Units the submitted emission rates are expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmissionUnits {
    #[default]
    #[serde(rename = "tons/year")]
    TonsPerYear,
    #[serde(rename = "kg/year")]
    KgPerYear,
    #[serde(rename = "ug/s")]
    UgPerSecond,
}

impl fmt::Display for EmissionUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmissionUnits::TonsPerYear => "tons/year",
            EmissionUnits::KgPerYear => "kg/year",
            EmissionUnits::UgPerSecond => "ug/s",
        })
    }
}

impl FromStr for EmissionUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tons/year" => Ok(EmissionUnits::TonsPerYear),
            "kg/year" => Ok(EmissionUnits::KgPerYear),
            "ug/s" | "μg/s" => Ok(EmissionUnits::UgPerSecond),
            other => Err(format!(
                "emission units must be one of tons/year, kg/year, ug/s, but are `{other}`"
            )),
        }
    }
}

/// One emissions scenario to be run through an SR matrix.
///
/// Immutable once constructed; [`JobRequest::new`] validates the model
/// identifier up front so a bad value never reaches the executable.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub(crate) emissions: SpatialTable,
    pub(crate) model: SrMatrix,
    pub(crate) output_variables: Vec<String>,
    pub(crate) units: EmissionUnits,
}

impl JobRequest {
    /// Builds a request, resolving `model` against the matrix catalog.
    ///
    /// Fails with [`Error::InvalidModel`] (listing the allowed identifiers)
    /// before any file is written or subprocess started.
    pub fn new<S: Into<String>>(
        emissions: SpatialTable,
        model: &str,
        output_variables: impl IntoIterator<Item = S>,
        units: EmissionUnits,
    ) -> Result<Self, Error> {
        let model = model.parse::<SrMatrix>()?;
        Ok(Self {
            emissions,
            model,
            output_variables: output_variables.into_iter().map(Into::into).collect(),
            units,
        })
    }

    pub fn model(&self) -> SrMatrix {
        self.model
    }

    pub fn output_variables(&self) -> &[String] {
        &self.output_variables
    }

    pub fn units(&self) -> EmissionUnits {
        self.units
    }

    pub fn emissions(&self) -> &SpatialTable {
        &self.emissions
    }
}

/// A submitted job: remote name, local output directory, start time.
///
/// Exactly one run owns a handle; the name is unique within the process.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub(crate) name: String,
    pub(crate) dir: PathBuf,
    pub(crate) started: Instant,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory where `cloud output` materializes the result files.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Wall-clock time since submission.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Remote job state as reported by `cloud status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Complete,
    /// Terminal state other than `Complete`; carries the raw status text.
    Failed(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> JobStatus {
        match raw {
            "Running" => JobStatus::Running,
            "Complete" => JobStatus::Complete,
            other => JobStatus::Failed(other.to_string()),
        }
    }
}

static NEXT_JOB: AtomicU64 = AtomicU64::new(0);

/// Generates a job name from the submission time plus a process-wide
/// counter, so repeated submissions within the same second stay distinct.
pub(crate) fn generate_name() -> String {
    let seq = NEXT_JOB.fetch_add(1, Ordering::Relaxed);
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("run_aqm_{secs}_{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_ids_round_trip() {
        for m in SrMatrix::ALL {
            assert_eq!(m.id().parse::<SrMatrix>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_matrix_lists_allowed_set() {
        let err = "isrm_v2".parse::<SrMatrix>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("`isrm_v2`"), "{msg}");
        for m in SrMatrix::ALL {
            assert!(msg.contains(m.id()), "{msg}");
        }
    }

    #[test]
    fn matrix_data_paths_are_catalogued() {
        assert_eq!(SrMatrix::Isrm.data_path(), "/data/isrmv121/isrm_v1.2.1.ncf");
        assert_eq!(
            SrMatrix::ApscaQ3.data_path(),
            "/data/apsca/apsca_sr_Q3_v1.2.1.ncf"
        );
    }

    #[test]
    fn units_accept_both_microgram_spellings() {
        assert_eq!(
            "ug/s".parse::<EmissionUnits>().unwrap(),
            EmissionUnits::UgPerSecond
        );
        assert_eq!(
            "μg/s".parse::<EmissionUnits>().unwrap(),
            EmissionUnits::UgPerSecond
        );
        assert_eq!(EmissionUnits::UgPerSecond.to_string(), "ug/s");
    }

    #[test]
    fn job_names_are_distinct() {
        let a = generate_name();
        let b = generate_name();
        let c = generate_name();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn status_parse_treats_unknown_as_failed() {
        assert_eq!(JobStatus::parse("Running"), JobStatus::Running);
        assert_eq!(JobStatus::parse("Complete"), JobStatus::Complete);
        assert_eq!(
            JobStatus::parse("Evicted"),
            JobStatus::Failed("Evicted".to_string())
        );
    }
}
