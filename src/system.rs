use crate::archive::MARKER_EXTENSION;
use crate::config::{Elevation, Settings};
use crate::error::{PtmError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const ALTERNATIVES_NAME: &str = "default.plymouth";

pub const ALTERNATIVES_PRIORITY: &str = "100";

pub static THEME_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs. `privileged` calls need root.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], privileged: bool) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    elevation: Elevation,
}

impl SystemRunner {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str], privileged: bool) -> Result<CommandOutput> {
        let mut command = match self.elevation.program().filter(|_| privileged) {
            Some(elevate) => {
                let mut command = Command::new(elevate);
                command.arg(program);
                command
            }
            None => Command::new(program),
        };
        command.args(args);

        debug!(program, ?args, privileged, "Running command");
        let output = command.output()?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub fn validate_theme_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || !THEME_NAME_PATTERN.is_match(name) {
        return Err(PtmError::InvalidThemeName(name.to_string()));
    }
    Ok(())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    privileged: bool,
) -> Result<CommandOutput> {
    let output = runner.run(program, args, privileged)?;
    if output.success {
        Ok(output)
    } else {
        Err(PtmError::CommandFailed {
            program: program.to_string(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// A theme registered with the alternatives system. `marker` is the path
/// exactly as `update-alternatives` lists it; `name` is only for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTheme {
    pub name: String,
    pub marker: PathBuf,
}

impl RegisteredTheme {
    pub fn from_marker(marker: impl Into<PathBuf>) -> Option<Self> {
        let marker = marker.into();
        let name = marker
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .filter(|name| !name.is_empty())?;
        Some(Self { name, marker })
    }
}

/// Registered themes from `update-alternatives --list` output, in order.
pub fn parse_list_output(stdout: &str) -> Vec<RegisteredTheme> {
    let mut themes: Vec<RegisteredTheme> = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(theme) = RegisteredTheme::from_marker(line) {
            if !themes.iter().any(|t| t.marker == theme.marker) {
                themes.push(theme);
            }
        }
    }
    themes
}

/// The selected marker from `update-alternatives --query` output.
pub fn parse_query_value(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Value:"))
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "none")
        .map(PathBuf::from)
}

/// Checks a marker path before it reaches a privileged command line and
/// returns the theme directory holding it.
pub fn validate_marker(marker: &Path) -> Result<&Path> {
    let invalid = || PtmError::InvalidThemeName(marker.display().to_string());

    let plain = marker.is_absolute()
        && marker
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));
    if !plain || marker.extension().and_then(|e| e.to_str()) != Some(MARKER_EXTENSION) {
        return Err(invalid());
    }

    let file_name = marker.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    validate_theme_name(file_name)?;

    let dir = marker.parent().ok_or_else(invalid)?;
    let dir_name = dir.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    validate_theme_name(dir_name)?;

    // Never hand `/` or a top-level directory to `rm -rf`.
    if dir.parent().map_or(true, |p| p.parent().is_none()) {
        return Err(invalid());
    }
    Ok(dir)
}

pub fn list_registered(runner: &dyn CommandRunner) -> Result<Vec<RegisteredTheme>> {
    let output = runner.run("update-alternatives", &["--list", ALTERNATIVES_NAME], false)?;
    if !output.success {
        // No alternatives registered yet.
        return Ok(Vec::new());
    }
    Ok(parse_list_output(&output.stdout))
}

pub fn current_marker(runner: &dyn CommandRunner) -> Result<Option<PathBuf>> {
    let output = runner.run("update-alternatives", &["--query", ALTERNATIVES_NAME], false)?;
    if !output.success {
        return Ok(None);
    }
    Ok(parse_query_value(&output.stdout))
}

fn rebuild_initramfs(runner: &dyn CommandRunner) -> Result<()> {
    run_checked(runner, "update-initramfs", &["-u"], true)?;
    Ok(())
}

/// Copies an extracted theme directory into the themes dir as `dir_name` and
/// makes `<dir_name>/<marker_file>` the active boot splash. Returns the
/// registered marker path.
pub fn install_theme_dir(
    settings: &Settings,
    runner: &dyn CommandRunner,
    source_dir: &Path,
    dir_name: &str,
    marker_file: &str,
) -> Result<PathBuf> {
    validate_theme_name(dir_name)?;
    validate_theme_name(marker_file)?;

    let target_dir = settings.theme_dir(dir_name);
    let marker_path = target_dir.join(marker_file);

    let themes_dir = path_arg(&settings.themes_dir);
    let target = path_arg(&target_dir);
    let source = path_arg(source_dir);
    let link = path_arg(&settings.alternatives_link());
    let marker = path_arg(&marker_path);

    run_checked(runner, "mkdir", &["-p", &themes_dir], true)?;
    run_checked(runner, "rm", &["-rf", &target], true)?;
    run_checked(runner, "cp", &["-r", &source, &target], true)?;
    run_checked(
        runner,
        "update-alternatives",
        &["--install", &link, ALTERNATIVES_NAME, &marker, ALTERNATIVES_PRIORITY],
        true,
    )?;
    run_checked(
        runner,
        "update-alternatives",
        &["--set", ALTERNATIVES_NAME, &marker],
        true,
    )?;
    rebuild_initramfs(runner)?;

    info!(theme = dir_name, marker = %marker, "Installed and activated theme");
    Ok(marker_path)
}

pub fn set_active(runner: &dyn CommandRunner, marker: &Path) -> Result<()> {
    validate_marker(marker)?;

    let marker_arg = path_arg(marker);
    run_checked(
        runner,
        "update-alternatives",
        &["--set", ALTERNATIVES_NAME, &marker_arg],
        true,
    )?;
    rebuild_initramfs(runner)?;

    info!(marker = %marker_arg, "Activated theme");
    Ok(())
}

pub fn uninstall_theme(runner: &dyn CommandRunner, marker: &Path) -> Result<()> {
    let dir = validate_marker(marker)?;

    let marker_arg = path_arg(marker);
    let target = path_arg(dir);

    run_checked(
        runner,
        "update-alternatives",
        &["--remove", ALTERNATIVES_NAME, &marker_arg],
        true,
    )?;
    run_checked(runner, "rm", &["-rf", &target], true)?;
    rebuild_initramfs(runner)?;

    info!(marker = %marker_arg, "Uninstalled theme");
    Ok(())
}
