//! Corrupt file detection using an external OPUS file validator.
//!
//! The validator is a compiled program derived from the PROFFAST 2 preprocessor.
//! It reads a manifest listing the files to check and prints a verification
//! report. Because a retrieval fails on any corrupt interferogram, this is used to
//! filter a directory before the detailed parser is used.
//!
//! The validator's working directory holds the compiled binary, the manifest
//! template, per-call manifests, a lock file, and the raw output of the last run.
//! Everything written there happens while holding the lock file, so any number
//! of threads or processes may use the same working directory.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::lock::DirLock;
use crate::{Error, Result};

/// Name of the lock file in the validator working directory.
pub const LOCK_FILE: &str = "opus_file_validator.lock";
/// Name of the manifest template in the validator working directory.
pub const TEMPLATE_FILE: &str = "opus_file_validator.template.inp";
/// Prefix of generated manifest file names.
pub const MANIFEST_PREFIX: &str = "opus_file_validator.inp.";
/// Placeholder in the template replaced by the candidate file list.
pub const FILE_LIST_PLACEHOLDER: &str = "%IFG_LIST%";
/// Raw output of the most recent run.
pub const OUTPUT_FILE: &str = "output.txt";

pub const START_MARKER: &str = "--- Start verifying file integrities ---";
pub const DONE_MARKER: &str = "--- Done verifying file integrities ---";

/// Problem reported for files the validator did not mention at all.
pub const UNREADABLE: &str = "file not even readable by the parser";

/// Environment variable holding the validator working directory.
pub const VALIDATOR_DIR_ENV: &str = "OPUS_VALIDATOR_DIR";
/// Environment variable overriding the Fortran compiler.
pub const VALIDATOR_COMPILER_ENV: &str = "OPUS_VALIDATOR_COMPILER";

/// Default time to wait for another holder of the working directory lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const MANIFEST_ID_LEN: usize = 10;

/// Problems found per corrupt file name. Valid files are absent.
pub type CorruptionReport = HashMap<String, Vec<String>>;

/// Captured result of a validator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorOutput {
    /// Exit code, `None` if terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ValidatorOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

impl From<Output> for ValidatorOutput {
    fn from(output: Output) -> Self {
        Self {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// The program that actually checks files.
pub trait Validator {
    /// Directory holding the template, manifests, lock and output files.
    fn workdir(&self) -> &Path;

    /// Make the validator ready to run, e.g., by building it. Called while holding
    /// the working directory lock.
    ///
    /// # Errors
    /// Implementation specific.
    fn prepare(&self, _force_rebuild: bool) -> Result<()> {
        Ok(())
    }

    /// Run the validator on the manifest at `manifest`.
    ///
    /// # Errors
    /// Only if the validator could not be run at all. An unsuccessful run is
    /// reported through [ValidatorOutput::status].
    fn run(&self, manifest: &Path) -> Result<ValidatorOutput>;
}

/// The Fortran validator, compiled on first use.
#[derive(Debug, Clone)]
pub struct CompiledValidator {
    workdir: PathBuf,
    compiler: String,
    sources: Vec<String>,
    binary: String,
}

impl CompiledValidator {
    /// Validator with sources in `workdir`, compiled with `gfortran`.
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
            compiler: "gfortran".to_string(),
            sources: vec![
                "glob_prepro6.F90".to_string(),
                "glob_OPUSparms6.F90".to_string(),
                "opus_file_validator.F90".to_string(),
            ],
            binary: "opus_file_validator".to_string(),
        }
    }

    /// Use `compiler` instead of `gfortran`, e.g., `gfortran-9`.
    #[must_use]
    pub fn with_compiler(mut self, compiler: &str) -> Self {
        self.compiler = compiler.to_string();
        self
    }

    /// Configure from [VALIDATOR_DIR_ENV] and, if set, [VALIDATOR_COMPILER_ENV].
    ///
    /// # Errors
    /// [Error::Config] if [VALIDATOR_DIR_ENV] is not set.
    pub fn from_env() -> Result<Self> {
        let workdir = std::env::var_os(VALIDATOR_DIR_ENV)
            .ok_or_else(|| Error::Config(format!("{VALIDATOR_DIR_ENV} is not set")))?;
        let validator = Self::new(workdir);
        Ok(match std::env::var(VALIDATOR_COMPILER_ENV) {
            Ok(compiler) if !compiler.is_empty() => validator.with_compiler(&compiler),
            _ => validator,
        })
    }

    /// Path of the compiled binary.
    #[must_use]
    pub fn binary_path(&self) -> PathBuf {
        self.workdir.join(&self.binary)
    }

    fn compile_args(&self) -> Vec<String> {
        let mut args = vec![
            "-nocpp".to_string(),
            "-O3".to_string(),
            "-o".to_string(),
            format!("./{}", self.binary),
        ];
        args.extend(self.sources.iter().cloned());
        args
    }
}

impl Validator for CompiledValidator {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn prepare(&self, force_rebuild: bool) -> Result<()> {
        if !force_rebuild && self.binary_path().is_file() {
            return Ok(());
        }
        let args = self.compile_args();
        let command = format!("{} {}", self.compiler, args.join(" "));
        info!(%command, workdir = ?self.workdir, "compiling validator");

        let output: ValidatorOutput = Command::new(&self.compiler)
            .args(&args)
            .current_dir(&self.workdir)
            .output()?
            .into();
        if !output.success() {
            return Err(Error::Compile {
                command,
                status: output.status,
                stdout: output.stdout.trim().to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn run(&self, manifest: &Path) -> Result<ValidatorOutput> {
        debug!(?manifest, "running validator");
        // the child runs in the workdir, relative paths would resolve against it twice
        Ok(Command::new(std::path::absolute(self.binary_path())?)
            .arg(std::path::absolute(manifest)?)
            .current_dir(&self.workdir)
            .output()?
            .into())
    }
}

/// Classifies the files of a directory as valid or corrupt.
#[derive(Debug, Clone)]
pub struct Detector<V> {
    validator: V,
    lock_timeout: Duration,
}

impl<V> Detector<V>
where
    V: Validator,
{
    pub fn new(validator: V) -> Self {
        Self {
            validator,
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    /// Wait at most `timeout` for the working directory lock instead of
    /// [LOCK_TIMEOUT].
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Check every regular file in `directory`.
    ///
    /// Returns the problems of each corrupt file keyed by file name; files that
    /// are not in the report are valid.
    ///
    /// # Errors
    /// [Error::Validator] if the validator exits unsuccessfully, an ``std::io::Error``
    /// of kind ``TimedOut`` if the working directory stays locked,
    /// [Error::ValidatorContract] if its output cannot be interpreted, errors from
    /// [Validator::prepare], or any ``std::io::Error`` listing `directory` or
    /// writing to the working directory.
    pub fn detect<P: AsRef<Path>>(
        &self,
        directory: P,
        force_rebuild: bool,
    ) -> Result<CorruptionReport> {
        // the validator runs in its workdir, paths handed to it must be absolute
        let workdir = std::path::absolute(self.validator.workdir())?;
        let directory = fs::canonicalize(directory.as_ref())?;
        let lock_path = workdir.join(LOCK_FILE);

        {
            let _lock = DirLock::acquire(&lock_path, self.lock_timeout)?;
            self.validator.prepare(force_rebuild)?;
        }

        let files = list_files(&directory)?;
        debug!(?directory, files = files.len(), "checking files");

        let manifest = {
            let _lock = DirLock::acquire(&lock_path, self.lock_timeout)?;
            write_manifest(&workdir, &files)?
        };

        let output = self.validator.run(&manifest);
        if let Err(err) = fs::remove_file(&manifest) {
            warn!(?manifest, %err, "failed to remove manifest");
        }
        let output = output?;
        if !output.success() {
            return Err(Error::Validator {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let report = parse_report(&output.stdout, &files)?;

        {
            let _lock = DirLock::acquire(&lock_path, self.lock_timeout)?;
            fs::write(workdir.join(OUTPUT_FILE), &output.stdout)?;
        }

        info!(
            files = files.len(),
            corrupt = report.len(),
            "finished checking files"
        );
        Ok(report)
    }
}

/// Check every regular file in `directory` using the [CompiledValidator]
/// configured from the environment.
///
/// # Errors
/// See [CompiledValidator::from_env] and [Detector::detect].
pub fn detect_corrupt_files<P: AsRef<Path>>(
    directory: P,
    force_recompile: bool,
) -> Result<CorruptionReport> {
    Detector::new(CompiledValidator::from_env()?).detect(directory, force_recompile)
}

/// Regular files in `directory`, sorted by path. Paths are absolute if
/// `directory` is.
fn list_files(directory: &Path) -> Result<Vec<String>> {
    let mut files = Vec::default();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path.to_string_lossy().to_string());
        }
    }
    files.sort();
    Ok(files)
}

fn random_id(len: usize, taken: &HashSet<String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: String = (0..len)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect();
        if !taken.contains(&id) {
            return id;
        }
    }
}

/// Write a manifest for `files` under a name not used by any existing manifest.
/// Must be called while holding the working directory lock.
fn write_manifest(workdir: &Path, files: &[String]) -> Result<PathBuf> {
    let mut taken = HashSet::default();
    for entry in fs::read_dir(workdir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(id) = name.strip_prefix(MANIFEST_PREFIX) {
            taken.insert(id.to_string());
        }
    }
    let id = random_id(MANIFEST_ID_LEN, &taken);

    let template = fs::read_to_string(workdir.join(TEMPLATE_FILE))?;
    let path = workdir.join(format!("{MANIFEST_PREFIX}{id}"));
    fs::write(&path, template.replace(FILE_LIST_PLACEHOLDER, &files.join("\n")))?;
    debug!(?path, "wrote manifest");
    Ok(path)
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().to_string())
}

/// Interpret validator output for the manifest `files`.
///
/// The report is the text between [START_MARKER] and [DONE_MARKER]. It holds one
/// blank-line separated section per checked file; the first line quotes the file
/// path, the last line is a summary, and any lines between are problems. Files
/// with no section could not be opened by the validator and are reported as
/// [UNREADABLE].
///
/// # Errors
/// [Error::ValidatorContract] if there is not exactly one of each marker or a
/// section has no quoted path.
pub fn parse_report(stdout: &str, files: &[String]) -> Result<CorruptionReport> {
    let starts = stdout.matches(START_MARKER).count();
    let dones = stdout.matches(DONE_MARKER).count();
    if starts != 1 || dones != 1 {
        return Err(Error::ValidatorContract(format!(
            "expected one start and one done marker, found {starts} and {dones}"
        )));
    }
    let (_, rest) = stdout.split_once(START_MARKER).unwrap_or_default();
    let (body, _) = rest.split_once(DONE_MARKER).ok_or_else(|| {
        Error::ValidatorContract("done marker precedes start marker".to_string())
    })?;

    let mut unchecked: BTreeSet<&str> = files.iter().map(String::as_str).collect();
    let mut report = CorruptionReport::default();

    let body = body.replace("\r\n", "\n");
    for section in body.split("\n\n") {
        let lines: Vec<&str> = section
            .trim_matches(|c: char| c == '\t' || c == '\n' || c == ' ')
            .lines()
            .collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            continue;
        }
        let path = lines[0].split('"').nth(1).ok_or_else(|| {
            Error::ValidatorContract(format!("no quoted file path in {:?}", lines[0]))
        })?;
        if !unchecked.remove(path) {
            warn!(path, "validator reported a file that was not requested");
        }
        if lines.len() > 2 {
            let problems = lines[1..lines.len() - 1]
                .iter()
                .map(|l| l.trim().to_string())
                .collect();
            report.insert(file_name(path), problems);
        }
    }

    for path in unchecked {
        report.insert(file_name(path), vec![UNREADABLE.to_string()]);
    }
    Ok(report)
}
