use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::database::FeatureDatabase;
use crate::SfmError;

/// Name of the database file written into the engine workspace.
pub const DATABASE_FILE: &str = "database.json";

/// External structure-from-motion solver.
///
/// `run` receives the feature database and an empty workspace directory. On
/// success the engine leaves one or more models in numbered subdirectories
/// (`0/`, `1/`, ...), each holding `images.bin` and `points3D.bin`. Failing to
/// reconstruct is signalled by leaving no model; `Err` is reserved for failures
/// to run the engine at all.
pub trait SfmEngine {
    fn run(&self, database: &FeatureDatabase, workspace: &Path) -> Result<(), SfmError>;
}

impl<E: SfmEngine + ?Sized> SfmEngine for &E {
    fn run(&self, database: &FeatureDatabase, workspace: &Path) -> Result<(), SfmError> {
        (**self).run(database, workspace)
    }
}

impl<E: SfmEngine + ?Sized> SfmEngine for Box<E> {
    fn run(&self, database: &FeatureDatabase, workspace: &Path) -> Result<(), SfmError> {
        (**self).run(database, workspace)
    }
}

/// Engine without a solver: never produces a model.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEngine;

impl SfmEngine for NoEngine {
    fn run(&self, _database: &FeatureDatabase, _workspace: &Path) -> Result<(), SfmError> {
        debug!("no reconstruction engine configured");
        Ok(())
    }
}

/// Runs an external program as `program [args...] <database.json> <workspace>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEngine {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a shell-like command line split on whitespace.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts))
    }
}

impl SfmEngine for CommandEngine {
    fn run(&self, database: &FeatureDatabase, workspace: &Path) -> Result<(), SfmError> {
        let database_path = workspace.join(DATABASE_FILE);
        database.write_json(&database_path)?;

        debug!("running {} in {}", self.program.display(), workspace.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&database_path)
            .arg(workspace)
            .output()
            .map_err(|source| SfmError::EngineLaunch {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            warn!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
