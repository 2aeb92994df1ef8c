use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::exec::ExecutableCache;
use crate::job::{self, JobHandle, JobRequest, JobStatus};
use crate::runner::{CommandError, CommandRunner, SystemRunner, require_success};
use crate::table::SpatialTable;

const DEFAULT_VERSION: &str = "1.8.0";
const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com/spatialmodel/inmap/releases/download";
const SR_PREDICT_CMDS: &str = "srpredict";
const OUTPUT_FILE: &str = "OutputFile.shp";

/// Requests that an in-flight job be abandoned.
///
/// Cloneable; trigger it from another thread to make the owning run stop at
/// its next poll tick. The run still cleans up its job artifacts before
/// returning [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Client for running emissions scenarios through InMAP cloud.
///
/// A run provisions the InMAP executable (downloaded at most once per
/// client, shared across clones), submits the emissions as a cloud job,
/// polls its status until it terminates, retrieves the output, and removes
/// the job's local and remote artifacts.
#[derive(Debug, Clone)]
pub struct Client {
    version: String,
    download_base: String,
    memory_gb: u32,
    poll_interval: Duration,
    max_wait: Option<Duration>,
    max_status_failures: Option<u32>,
    progress: bool,
    cancel: Option<CancelToken>,
    work_dir: PathBuf,

    http: HttpClient,
    runner: Arc<dyn CommandRunner>,
    cache: Arc<ExecutableCache>,
}

impl Client {
    pub fn new() -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("inmap-sr/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("inmap-sr")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        let work_dir = std::env::current_dir().context("failed to resolve working directory")?;

        Ok(Self {
            version: DEFAULT_VERSION.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            memory_gb: 2,
            poll_interval: Duration::from_secs(5),
            max_wait: None,
            max_status_failures: None,
            progress: true,
            cancel: None,
            work_dir,
            http,
            runner: Arc::new(SystemRunner),
            cache: Arc::new(ExecutableCache::new().context("failed to create scratch directory")?),
        })
    }

    /// InMAP release to download and to pass as `--version`.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Base URL the release binaries are published under.
    pub fn with_download_base(mut self, base: impl Into<String>) -> Self {
        self.download_base = base.into();
        self
    }

    /// Memory hint forwarded to the cloud scheduler, in GB.
    pub fn with_memory_gb(mut self, memory_gb: u32) -> Self {
        self.memory_gb = memory_gb;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds how long a job may stay `Running`. Unbounded by default.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Turns a persistent status-query outage into a fatal error after this
    /// many consecutive failures. Unbounded by default: a failed status
    /// check alone never aborts a job.
    pub fn with_max_status_failures(mut self, max: u32) -> Self {
        self.max_status_failures = Some(max);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Directory job output folders are materialized under. Defaults to the
    /// current working directory.
    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Uses an already-installed InMAP executable instead of downloading one.
    pub fn with_executable(self, path: PathBuf) -> Self {
        self.cache.set(path);
        self
    }

    /// Replaces the subprocess backend, e.g. for tests.
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Returns the path of the InMAP executable, downloading the platform
    /// binary on the first call.
    pub fn executable(&self) -> Result<PathBuf, Error> {
        self.cache
            .ensure(&self.http, &self.download_base, &self.version, self.progress)
    }

    /// Runs `request` through its SR matrix and returns the model output.
    ///
    /// Blocks for the job's wall-clock duration. Whatever the outcome after
    /// submission succeeds — retrieval, job failure, timeout, cancellation —
    /// the job's artifacts are cleaned up exactly once before returning.
    pub fn run(&self, request: &JobRequest) -> Result<SpatialTable, Error> {
        let exe = self.executable()?;
        let handle = self.submit(&exe, request)?;

        let outcome = self
            .wait(&exe, &handle)
            .and_then(|()| self.fetch(&exe, &handle));
        self.cleanup(&exe, &handle);

        let table = outcome?;
        eprintln!("Finished ({}s)", handle.elapsed().as_secs());
        Ok(table)
    }

    fn submit(&self, exe: &Path, request: &JobRequest) -> Result<JobHandle, Error> {
        let name = job::generate_name();

        let emis_file = self.cache.dir().join(format!("{name}.shp"));
        request
            .emissions()
            .to_shapefile(&emis_file)
            .map_err(|e| Error::Submission {
                job: name.clone(),
                source: e.into(),
            })?;

        let output_variables =
            serde_json::to_string(request.output_variables()).map_err(|e| Error::Submission {
                job: name.clone(),
                source: Box::new(e),
            })?;

        let args = vec![
            "cloud".to_string(),
            "start".to_string(),
            format!("--cmds={SR_PREDICT_CMDS}"),
            format!("--version={}", self.version),
            format!("--job_name={name}"),
            format!("--memory_gb={}", self.memory_gb),
            format!("--EmissionUnits={}", request.units()),
            format!("--EmissionsShapefiles={}", emis_file.display()),
            format!("--OutputVariables={output_variables}"),
            format!("--SR.OutputFile={}", request.model().data_path()),
        ];
        self.checked(exe, &args).map_err(|e| Error::Submission {
            job: name.clone(),
            source: Box::new(e),
        })?;

        Ok(JobHandle {
            dir: self.work_dir.join(&name),
            name,
            started: Instant::now(),
        })
    }

    /// Polls `cloud status` until the job leaves `Running`.
    ///
    /// A failed status query is transient: it says nothing about the job's
    /// actual outcome, so it is reported and polling continues. A status
    /// outside {`Running`, `Complete`} is terminal and fails immediately.
    fn wait(&self, exe: &Path, handle: &JobHandle) -> Result<(), Error> {
        let spinner = if self.progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}").unwrap());
            Some(pb)
        } else {
            None
        };
        let finish = |pb: &Option<ProgressBar>| {
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
        };

        let status_args = vec![
            "cloud".to_string(),
            "status".to_string(),
            format!("--job_name={}", handle.name),
        ];
        let mut failures = 0u32;
        let mut last_status: Option<String> = None;

        loop {
            if let Some(token) = &self.cancel {
                if token.is_cancelled() {
                    finish(&spinner);
                    return Err(Error::Cancelled {
                        job: handle.name.clone(),
                    });
                }
            }

            match self.checked(exe, &status_args) {
                Ok(raw) => {
                    failures = 0;
                    let raw = raw.trim().to_string();
                    match JobStatus::parse(&raw) {
                        JobStatus::Complete => {
                            finish(&spinner);
                            return Ok(());
                        }
                        JobStatus::Running => {
                            let elapsed = handle.elapsed().as_secs();
                            if let Some(pb) = &spinner {
                                pb.set_message(format!("simulation Running ({elapsed}s)"));
                                pb.tick();
                            } else if last_status.as_deref() != Some(raw.as_str()) {
                                eprintln!("Job status: {raw} ({elapsed}s)");
                            }
                            last_status = Some(raw);
                        }
                        JobStatus::Failed(status) => {
                            finish(&spinner);
                            return Err(Error::JobFailed {
                                job: handle.name.clone(),
                                status,
                            });
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    eprintln!(
                        "transient status check failure for {}: {err}",
                        handle.name
                    );
                    if let Some(max) = self.max_status_failures {
                        if failures >= max {
                            finish(&spinner);
                            return Err(Error::StatusCheckExhausted {
                                job: handle.name.clone(),
                                failures,
                            });
                        }
                    }
                }
            }

            if let Some(max) = self.max_wait {
                if handle.elapsed() >= max {
                    finish(&spinner);
                    return Err(Error::Timeout {
                        job: handle.name.clone(),
                        limit_secs: max.as_secs(),
                    });
                }
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn fetch(&self, exe: &Path, handle: &JobHandle) -> Result<SpatialTable, Error> {
        let args = vec![
            "cloud".to_string(),
            "output".to_string(),
            format!("--job_name={}", handle.name),
        ];
        self.checked(exe, &args).map_err(|e| Error::Retrieval {
            job: handle.name.clone(),
            source: Box::new(e),
        })?;

        SpatialTable::from_shapefile(&handle.dir.join(OUTPUT_FILE)).map_err(|e| {
            Error::Retrieval {
                job: handle.name.clone(),
                source: e.into(),
            }
        })
    }

    /// Best-effort teardown of the job's local output directory and its
    /// remote counterpart. Failures are reported to stderr but never replace
    /// the run's outcome.
    fn cleanup(&self, exe: &Path, handle: &JobHandle) {
        if let Err(e) = std::fs::remove_dir_all(&handle.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                eprintln!("failed to remove {}: {e}", handle.dir.display());
            }
        }

        let args = vec![
            "cloud".to_string(),
            "delete".to_string(),
            format!("--job_name={}", handle.name),
        ];
        if let Err(e) = self.checked(exe, &args) {
            eprintln!("failed to delete job {}: {e}", handle.name);
        }
    }

    fn checked(&self, exe: &Path, args: &[String]) -> Result<String, CommandError> {
        let output = self
            .runner
            .run(exe, args, &self.work_dir)
            .map_err(|e| CommandError::Spawn {
                program: exe.display().to_string(),
                source: e,
            })?;
        require_success(output)
    }
}
