//! A small Rust client for the InMAP cloud air-quality service.
//!
//! This crate implements the source-receptor (SR) prediction flow:
//! submit an emissions dataset as a cloud job, poll until it completes,
//! then read back the predicted concentrations as a geospatial table.
//! InMAP itself stays an opaque executable; the client downloads the
//! platform binary on first use and drives it through its `cloud`
//! subcommands.
//!
//! ## Quick start
//!
//! ```no_run
//! use anyhow::Result;
//! use inmap_sr::{Client, EmissionUnits, Feature, Geometry, JobRequest, SpatialTable};
//! use std::collections::BTreeMap;
//!
//! fn main() -> Result<()> {
//!     let mut rates = BTreeMap::new();
//!     rates.insert("PM2_5".to_string(), 100.0);
//!     let emissions = SpatialTable::new(vec![Feature::new(
//!         Geometry::Point { x: -118.2, y: 34.0 },
//!         rates,
//!     )]);
//!
//!     let request = JobRequest::new(
//!         emissions,
//!         "isrm",
//!         ["TotalPM25", "TotalPopD"],
//!         EmissionUnits::TonsPerYear,
//!     )?;
//!
//!     let client = Client::new()?;
//!     let output = client.run(&request)?;
//!     println!("{} receptors", output.len());
//!     Ok(())
//! }
//! ```
//!
//! Runs block for the job's wall-clock duration; see
//! [`Client::with_max_wait`] and [`CancelToken`] for bounding them.

#![forbid(unsafe_code)]

mod client;
mod error;
mod exec;
mod job;
mod runner;
mod table;
mod util;

pub use client::{CancelToken, Client};
pub use error::Error;
pub use job::{EmissionUnits, JobHandle, JobRequest, JobStatus, SrMatrix};
pub use runner::{CommandError, CommandRunner, RunOutput, SystemRunner};
pub use table::{Feature, Geometry, SpatialTable};
