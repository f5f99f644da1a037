use crate::archive;
use crate::catalog::ThemeDescriptor;
use crate::config::Settings;
use crate::error::{PtmError, Result};
use crate::preview;
use crate::store::InstalledStore;
use crate::system::{self, CommandRunner, RegisteredTheme};
use reqwest::blocking::Client;
use std::path::Path;
use tracing::{info, warn};

/// Downloads, extracts and installs a catalog theme. Returns the name it was
/// installed under.
pub fn install(
    settings: &Settings,
    runner: &dyn CommandRunner,
    client: &Client,
    theme: &ThemeDescriptor,
) -> Result<String> {
    let url = theme
        .download_url
        .as_deref()
        .ok_or_else(|| PtmError::Config(format!("{} has no download URL", theme.name)))?;

    let workspace = tempfile::Builder::new().prefix("ptm_install_").tempdir()?;
    let archive_path = archive::download_archive(client, url, workspace.path())?;

    install_from_archive(settings, runner, &archive_path, &theme.name)
}

/// Installs a theme from an archive already on disk. The preview cached for
/// `display_name` is recorded alongside it.
pub fn install_from_archive(
    settings: &Settings,
    runner: &dyn CommandRunner,
    archive_path: &Path,
    display_name: &str,
) -> Result<String> {
    let workspace = tempfile::Builder::new().prefix("ptm_extract_").tempdir()?;
    archive::extract(archive_path, workspace.path())?;

    let extracted = archive::locate_theme(workspace.path())?;
    system::install_theme_dir(
        settings,
        runner,
        &extracted.dir,
        &extracted.name,
        &extracted.marker_file,
    )?;

    let preview = settings
        .converted_dir()
        .join(preview::cache_file_name(display_name));
    let mut store = InstalledStore::load(settings.store_file())?;
    store.mark_installed(&extracted.name, &preview)?;

    info!(theme = %extracted.name, display_name, "Theme installed");
    Ok(extracted.name)
}

pub fn uninstall(
    settings: &Settings,
    runner: &dyn CommandRunner,
    theme: &RegisteredTheme,
) -> Result<()> {
    system::uninstall_theme(runner, &theme.marker)?;

    let mut store = InstalledStore::load(settings.store_file())?;
    if !store.remove(&theme.name)? {
        warn!(theme = %theme.name, "Uninstalled theme was not in the installed record");
    }
    Ok(())
}

pub fn activate(runner: &dyn CommandRunner, theme: &RegisteredTheme) -> Result<()> {
    system::set_active(runner, &theme.marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_archive;
    use crate::store::tests::preview_of;
    use crate::system::testing::RecordingRunner;
    use std::path::PathBuf;

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            config_dir: dir.join("config"),
            themes_dir: PathBuf::from("/usr/share/plymouth/themes"),
            ..Settings::default()
        }
    }

    #[test]
    fn installs_and_records_theme() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let archive = dir.path().join("spinner.tar.gz");
        build_archive(
            &archive,
            &[
                ("spinner-1.0/spinner/spinner.plymouth", "[Plymouth Theme]\n"),
                ("spinner-1.0/spinner/throbber-0001.png", "png"),
            ],
            true,
        );

        let runner = RecordingRunner::default();
        let name = install_from_archive(&settings, &runner, &archive, "Spinner Blue").unwrap();
        assert_eq!(name, "spinner");

        let lines = runner.lines();
        assert_eq!(lines.len(), 6);
        assert!(lines[2].starts_with("cp -r "));
        assert!(lines[2].ends_with("spinner-1.0/spinner /usr/share/plymouth/themes/spinner"));

        let store = InstalledStore::load(settings.store_file()).unwrap();
        assert_eq!(
            preview_of(&store, "spinner"),
            Some(settings.converted_dir().join("Spinner_20Blue.gif"))
        );
    }

    #[test]
    fn directory_name_survives_install() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let archive = dir.path().join("spinner-blue.tar.gz");
        build_archive(
            &archive,
            &[
                (
                    "spinner-blue/spinner_blue.plymouth",
                    "[spinner]\nImageDir=/usr/share/plymouth/themes/spinner-blue\n",
                ),
                ("spinner-blue/throbber-0001.png", "png"),
            ],
            true,
        );

        let runner = RecordingRunner::default();
        let name = install_from_archive(&settings, &runner, &archive, "Spinner Blue").unwrap();
        assert_eq!(name, "spinner-blue");

        let lines = runner.lines();
        assert!(lines[2].ends_with("/spinner-blue /usr/share/plymouth/themes/spinner-blue"));
        assert_eq!(
            lines[4],
            "update-alternatives --set default.plymouth /usr/share/plymouth/themes/spinner-blue/spinner_blue.plymouth"
        );

        let store = InstalledStore::load(settings.store_file()).unwrap();
        assert!(preview_of(&store, "spinner-blue").is_some());
    }

    #[test]
    fn archive_without_marker_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let archive = dir.path().join("broken.tar.gz");
        build_archive(&archive, &[("broken/readme.txt", "nothing here")], true);

        let runner = RecordingRunner::default();
        let result = install_from_archive(&settings, &runner, &archive, "Broken");

        assert!(matches!(result, Err(PtmError::MarkerNotFound(_))));
        assert!(runner.calls.borrow().is_empty());
        assert!(!settings.store_file().exists());
    }

    #[test]
    fn failed_install_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let archive = dir.path().join("retro.tar.gz");
        build_archive(&archive, &[("retro/retro.plymouth", "x")], true);

        let runner = RecordingRunner {
            fail_on: Some("update-initramfs".to_string()),
            ..Default::default()
        };
        let result = install_from_archive(&settings, &runner, &archive, "Retro");

        assert!(matches!(result, Err(PtmError::CommandFailed { .. })));
        assert!(!settings.store_file().exists());
    }

    #[test]
    fn uninstall_drops_record() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let mut store = InstalledStore::load(settings.store_file()).unwrap();
        store.mark_installed("retro", Path::new("/x/retro.gif")).unwrap();

        let theme =
            RegisteredTheme::from_marker("/usr/share/plymouth/themes/retro/Retro.plymouth").unwrap();
        let runner = RecordingRunner::default();
        uninstall(&settings, &runner, &theme).unwrap();

        let store = InstalledStore::load(settings.store_file()).unwrap();
        assert_eq!(preview_of(&store, "retro"), None);
        assert_eq!(
            runner.lines()[0],
            "update-alternatives --remove default.plymouth /usr/share/plymouth/themes/retro/Retro.plymouth"
        );
        assert_eq!(runner.calls.borrow().len(), 3);
    }

    #[test]
    fn activate_sets_listed_marker() {
        let theme = RegisteredTheme::from_marker("/lib/plymouth/themes/bgrt/bgrt.plymouth").unwrap();
        let runner = RecordingRunner::default();
        activate(&runner, &theme).unwrap();

        assert_eq!(
            runner.lines(),
            [
                "update-alternatives --set default.plymouth /lib/plymouth/themes/bgrt/bgrt.plymouth",
                "update-initramfs -u",
            ]
        );
    }

    #[test]
    fn missing_download_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let theme = ThemeDescriptor {
            name: "Preview Only".to_string(),
            description: None,
            preview_url: None,
            download_url: None,
        };

        let runner = RecordingRunner::default();
        let client = crate::http::client().unwrap();
        let result = install(&settings, &runner, &client, &theme);
        assert!(matches!(result, Err(PtmError::Config(_))));
    }
}
