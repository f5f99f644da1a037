use crate::catalog::{self, ThemeDescriptor};
use crate::config::Settings;
use crate::error::{PtmError, Result};
use crate::http;
use crate::installer;
use crate::preview::{self, PreviewAnimation};
use crate::store::InstalledStore;
use crate::system::{self, RegisteredTheme, SystemRunner};
use gtk4::glib::{self, clone};
use gtk4::prelude::*;
use gtk4::{
    gdk, gio, Align, Box as GtkBox, Button, CssProvider, Image, Label, ListBox, ListBoxRow,
    MenuButton, Orientation, Picture, PolicyType, ScrolledWindow, SelectionMode, StringList,
};
use libadwaita as adw;
use adw::prelude::*;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

const APP_CSS: &str = r#"
.theme-card {
    padding: 12px;
}

.theme-title {
    font-size: 16px;
    font-weight: 700;
}

.theme-preview {
    border-radius: 8px;
}

.status-value {
    font-size: 14px;
    font-weight: 700;
    color: @accent_color;
}
"#;

const SMALL_PREVIEW_HEIGHT: i32 = 48;

pub fn load_css() {
    let provider = CssProvider::new();
    provider.load_from_string(APP_CSS);

    match gdk::Display::default() {
        Some(display) => gtk4::style_context_add_provider_for_display(
            &display,
            &provider,
            gtk4::STYLE_PROVIDER_PRIORITY_APPLICATION,
        ),
        None => warn!("No default display, skipping application CSS"),
    }
}

pub fn setup_actions(app: &adw::Application) {
    let about = gio::ActionEntry::builder("about")
        .activate(|app: &adw::Application, _, _| show_about(app))
        .build();
    let quit = gio::ActionEntry::builder("quit")
        .activate(|app: &adw::Application, _, _| app.quit())
        .build();

    app.add_action_entries([about, quit]);
    app.set_accels_for_action("app.quit", &["<primary>q"]);
}

fn show_about(app: &adw::Application) {
    let dialog = adw::AboutDialog::builder()
        .application_name("Plymouth Theme Manager")
        .application_icon("preferences-desktop-theme")
        .version(env!("CARGO_PKG_VERSION"))
        .developer_name("SoulInfernoDE")
        .website("https://github.com/SoulInfernoDE/plymouth-theme-manager")
        .comments("Browse, install and switch Plymouth boot splash themes.\nIcons by https://icons8.de")
        .license_type(gtk4::License::MitX11)
        .build();

    dialog.present(app.active_window().as_ref());
}

/// What the Uninstall and Change pages show.
#[derive(Debug, Default)]
struct InstalledSnapshot {
    registered: Vec<RegisteredTheme>,
    current: Option<PathBuf>,
    previews: BTreeMap<String, PathBuf>,
}

impl InstalledSnapshot {
    fn fetch(settings: &Settings) -> Result<Self> {
        let runner = SystemRunner::new(settings.elevation);
        let registered = system::list_registered(&runner)?;
        let current = system::current_marker(&runner)?;

        let previews = match InstalledStore::load(settings.store_file()) {
            Ok(store) => store
                .installed()
                .map(|(name, path)| (name.to_string(), path.to_path_buf()))
                .collect(),
            Err(e) => {
                warn!(error = %e, "Could not read installed themes record");
                BTreeMap::new()
            }
        };

        Ok(Self { registered, current, previews })
    }
}

/// Tags background loads so only the latest one may touch the widgets.
#[derive(Debug, Default)]
struct LoadGeneration(Cell<u64>);

impl LoadGeneration {
    fn next(&self) -> u64 {
        let generation = self.0.get().wrapping_add(1);
        self.0.set(generation);
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.0.get() == generation
    }
}

#[derive(Default)]
struct WindowState {
    busy: bool,
    registered: Vec<RegisteredTheme>,
    current_marker: Option<PathBuf>,
    catalog_load: LoadGeneration,
    installed_load: LoadGeneration,
}

#[derive(Clone)]
pub struct PtmWindow {
    window: adw::ApplicationWindow,
    toast_overlay: adw::ToastOverlay,
    catalog_list: ListBox,
    catalog_placeholder: Label,
    installed_list: ListBox,
    current_val: Label,
    theme_combo: adw::ComboRow,
    apply_btn: Button,
    refresh_btn: Button,
    settings: Rc<Settings>,
    state: Rc<RefCell<WindowState>>,
}

impl PtmWindow {
    pub fn new(app: &adw::Application, settings: Settings) -> adw::ApplicationWindow {
        let main_content = GtkBox::new(Orientation::Vertical, 0);
        let toast_overlay = adw::ToastOverlay::new();
        toast_overlay.set_child(Some(&main_content));

        let window = adw::ApplicationWindow::builder()
            .application(app)
            .title("Plymouth Theme Manager")
            .default_width(800)
            .default_height(600)
            .content(&toast_overlay)
            .build();

        let stack = adw::ViewStack::new();
        stack.set_vexpand(true);

        let (header, refresh_btn) = Self::build_header(&stack);
        main_content.append(&header);
        main_content.append(&stack);

        let (install_page, catalog_list, catalog_placeholder) = Self::build_install_page();
        stack.add_titled_with_icon(&install_page, Some("install"), "Install", "folder-download-symbolic");

        let (uninstall_page, installed_list) = Self::build_uninstall_page();
        stack.add_titled_with_icon(&uninstall_page, Some("uninstall"), "Uninstall", "user-trash-symbolic");

        let (change_page, current_val, theme_combo, apply_btn) = Self::build_change_page();
        stack.add_titled_with_icon(&change_page, Some("change"), "Change Theme", "emblem-system-symbolic");

        let win = Self {
            window: window.clone(),
            toast_overlay,
            catalog_list,
            catalog_placeholder,
            installed_list,
            current_val,
            theme_combo,
            apply_btn,
            refresh_btn,
            settings: Rc::new(settings),
            state: Rc::new(RefCell::new(WindowState::default())),
        };

        win.setup_signals();
        win.load_catalog();
        win.load_installed();

        window
    }

    fn build_header(stack: &adw::ViewStack) -> (adw::HeaderBar, Button) {
        let header = adw::HeaderBar::new();

        let switcher = adw::ViewSwitcher::builder()
            .stack(stack)
            .policy(adw::ViewSwitcherPolicy::Wide)
            .build();
        header.set_title_widget(Some(&switcher));

        let refresh_btn = Button::builder()
            .icon_name("view-refresh-symbolic")
            .tooltip_text("Reload themes")
            .build();
        header.pack_start(&refresh_btn);

        let menu = gio::Menu::new();
        menu.append(Some("About Plymouth Theme Manager"), Some("app.about"));
        menu.append(Some("Quit"), Some("app.quit"));
        let menu_btn = MenuButton::builder()
            .icon_name("open-menu-symbolic")
            .menu_model(&menu)
            .primary(true)
            .build();
        header.pack_end(&menu_btn);

        (header, refresh_btn)
    }

    fn scrolled_list() -> (ScrolledWindow, ListBox) {
        let scroll = ScrolledWindow::builder()
            .vexpand(true)
            .hscrollbar_policy(PolicyType::Never)
            .build();

        let clamp = adw::Clamp::builder()
            .maximum_size(640)
            .margin_top(18)
            .margin_bottom(18)
            .margin_start(12)
            .margin_end(12)
            .build();
        scroll.set_child(Some(&clamp));

        let list = ListBox::builder()
            .selection_mode(SelectionMode::None)
            .css_classes(["boxed-list"])
            .valign(Align::Start)
            .build();
        clamp.set_child(Some(&list));

        (scroll, list)
    }

    fn build_install_page() -> (ScrolledWindow, ListBox, Label) {
        let (scroll, list) = Self::scrolled_list();

        let placeholder = Label::builder()
            .label("Loading themes...")
            .css_classes(["dim-label"])
            .margin_top(24)
            .margin_bottom(24)
            .build();
        list.set_placeholder(Some(&placeholder));

        (scroll, list, placeholder)
    }

    fn build_uninstall_page() -> (ScrolledWindow, ListBox) {
        let (scroll, list) = Self::scrolled_list();

        let placeholder = Label::builder()
            .label("No Plymouth themes registered")
            .css_classes(["dim-label"])
            .margin_top(24)
            .margin_bottom(24)
            .build();
        list.set_placeholder(Some(&placeholder));

        (scroll, list)
    }

    fn build_change_page() -> (adw::PreferencesPage, Label, adw::ComboRow, Button) {
        let page = adw::PreferencesPage::new();

        let status_group = adw::PreferencesGroup::builder()
            .title("Boot Splash")
            .build();
        let current_row = adw::ActionRow::builder()
            .title("Active Theme")
            .subtitle("Selected via update-alternatives")
            .build();
        let current_val = Label::builder()
            .label("...")
            .css_classes(["status-value"])
            .valign(Align::Center)
            .build();
        current_row.add_suffix(&current_val);
        status_group.add(&current_row);
        page.add(&status_group);

        let change_group = adw::PreferencesGroup::builder()
            .title("Change Theme")
            .description("The initramfs is rebuilt after switching, which can take a while.")
            .build();
        let theme_combo = adw::ComboRow::builder()
            .title("Theme")
            .subtitle("Installed Plymouth themes")
            .sensitive(false)
            .build();
        theme_combo.set_model(Some(&StringList::new(&["Loading..."])));
        change_group.add(&theme_combo);

        let apply_btn = Button::builder()
            .label("Apply")
            .margin_top(12)
            .css_classes(["suggested-action"])
            .sensitive(false)
            .build();
        change_group.add(&apply_btn);
        page.add(&change_group);

        (page, current_val, theme_combo, apply_btn)
    }

    fn setup_signals(&self) {
        let this = self.clone();
        self.refresh_btn.connect_clicked(move |_| {
            this.load_catalog();
            this.load_installed();
        });

        let this = self.clone();
        self.theme_combo.connect_selected_notify(move |combo| {
            let state = this.state.borrow();
            let selected = state.registered.get(combo.selected() as usize);
            let changed =
                selected.is_some_and(|t| Some(&t.marker) != state.current_marker.as_ref());
            this.apply_btn.set_sensitive(changed && !state.busy);
        });

        let this = self.clone();
        self.apply_btn.connect_clicked(move |btn| {
            let theme = {
                let state = this.state.borrow();
                match state.registered.get(this.theme_combo.selected() as usize) {
                    Some(theme) => theme.clone(),
                    None => return,
                }
            };
            let name = theme.name.clone();

            if !this.begin_operation() {
                return;
            }
            btn.set_sensitive(false);
            show_toast(&this.toast_overlay, &format!("Activating {}...", name));

            let elevation = this.settings.elevation;
            let this = this.clone();
            spawn_task(
                move || {
                    let runner = SystemRunner::new(elevation);
                    installer::activate(&runner, &theme)
                },
                move |result| {
                    this.end_operation();
                    match result {
                        Ok(()) => show_toast(&this.toast_overlay, &format!("{} is now the boot splash.", name)),
                        Err(e) => show_toast(&this.toast_overlay, &format!("Could not activate {}: {}", name, e)),
                    }
                    this.load_installed();
                },
            );
        });
    }

    fn begin_operation(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.busy {
            show_toast(&self.toast_overlay, "Another operation is still running.");
            return false;
        }
        state.busy = true;
        self.refresh_btn.set_sensitive(false);
        true
    }

    fn end_operation(&self) {
        self.state.borrow_mut().busy = false;
        self.refresh_btn.set_sensitive(true);
    }

    fn load_catalog(&self) {
        let generation = self.state.borrow().catalog_load.next();
        self.catalog_list.remove_all();
        self.catalog_placeholder.set_label("Loading themes...");

        let settings = (*self.settings).clone();
        let this = self.clone();
        spawn_task(
            move || {
                let client = http::client()?;
                catalog::fetch_catalog(&settings, &client)
            },
            move |result| {
                if !this.state.borrow().catalog_load.is_current(generation) {
                    debug!(generation, "Dropping superseded catalog load");
                    return;
                }
                this.show_catalog(result);
            },
        );
    }

    fn show_catalog(&self, result: Result<Vec<ThemeDescriptor>>) {
        self.catalog_list.remove_all();
        match result {
            Ok(themes) => {
                self.catalog_placeholder.set_label("The theme catalog is empty");
                for theme in &themes {
                    self.catalog_list.append(&self.build_catalog_row(theme));
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not load theme catalog");
                self.catalog_placeholder.set_label("Could not load the theme catalog");
                show_toast(&self.toast_overlay, &e.to_string());
            }
        }
    }

    fn build_catalog_row(&self, theme: &ThemeDescriptor) -> ListBoxRow {
        let card = GtkBox::builder()
            .orientation(Orientation::Vertical)
            .spacing(6)
            .css_classes(["theme-card"])
            .build();

        let title = Label::builder()
            .label(theme.name.as_str())
            .css_classes(["theme-title"])
            .halign(Align::Center)
            .build();
        card.append(&title);

        let slot = GtkBox::builder().halign(Align::Center).build();
        card.append(&slot);
        match theme.preview_url.clone() {
            Some(url) => {
                let settings = (*self.settings).clone();
                let name = theme.name.clone();
                fill_preview(&slot, None, move || {
                    let client = http::client()?;
                    let path = preview::get_or_create_scaled(&settings, &client, &name, &url)?;
                    preview::load_animation(&path)
                });
            }
            None => slot.append(&missing_image()),
        }

        if let Some(description) = &theme.description {
            let label = Label::builder()
                .label(description.as_str())
                .wrap(true)
                .justify(gtk4::Justification::Center)
                .css_classes(["dim-label"])
                .build();
            card.append(&label);
        }

        let install_btn = Button::builder()
            .label("Install")
            .halign(Align::Center)
            .css_classes(["suggested-action", "pill"])
            .sensitive(theme.download_url.is_some())
            .build();
        card.append(&install_btn);

        let theme = theme.clone();
        install_btn.connect_clicked(clone!(
            #[strong(rename_to = this)] self,
            move |btn| this.install(&theme, btn)
        ));

        ListBoxRow::builder()
            .activatable(false)
            .child(&card)
            .build()
    }

    fn install(&self, theme: &ThemeDescriptor, btn: &Button) {
        if !self.begin_operation() {
            return;
        }
        btn.set_sensitive(false);
        show_toast(&self.toast_overlay, &format!("Installing {}...", theme.name));

        let settings = (*self.settings).clone();
        let descriptor = theme.clone();
        let display_name = theme.name.clone();
        let btn = btn.clone();
        let this = self.clone();
        spawn_task(
            move || {
                let runner = SystemRunner::new(settings.elevation);
                let client = http::client()?;
                installer::install(&settings, &runner, &client, &descriptor)
            },
            move |result| {
                this.end_operation();
                btn.set_sensitive(true);
                match result {
                    Ok(installed) => show_toast(
                        &this.toast_overlay,
                        &format!("{} installed as {} and activated.", display_name, installed),
                    ),
                    Err(e) => show_toast(
                        &this.toast_overlay,
                        &format!("Installing {} failed: {}", display_name, e),
                    ),
                }
                this.load_installed();
            },
        );
    }

    fn load_installed(&self) {
        let generation = self.state.borrow().installed_load.next();
        let settings = (*self.settings).clone();
        let this = self.clone();
        spawn_task(
            move || InstalledSnapshot::fetch(&settings),
            move |result| {
                if !this.state.borrow().installed_load.is_current(generation) {
                    return;
                }
                let snapshot = result.unwrap_or_else(|e| {
                    warn!(error = %e, "Could not query installed themes");
                    InstalledSnapshot::default()
                });
                this.show_installed(snapshot);
            },
        );
    }

    fn show_installed(&self, snapshot: InstalledSnapshot) {
        {
            let mut state = self.state.borrow_mut();
            state.registered = snapshot.registered.clone();
            state.current_marker = snapshot.current.clone();
        }

        let current = snapshot
            .current
            .as_ref()
            .and_then(|marker| snapshot.registered.iter().position(|t| &t.marker == marker));

        self.installed_list.remove_all();
        for (idx, theme) in snapshot.registered.iter().enumerate() {
            let row = self.build_installed_row(
                theme,
                current == Some(idx),
                snapshot.previews.get(&theme.name).cloned(),
            );
            self.installed_list.append(&row);
        }

        let current_label = match (current, &snapshot.current) {
            (Some(idx), _) => snapshot.registered[idx].name.clone(),
            (None, Some(marker)) => marker.display().to_string(),
            (None, None) => "None".to_string(),
        };
        self.current_val.set_label(&current_label);

        // Changing the model fires selected-notify; the handler reads the
        // state written above, so the Apply button stays consistent.
        if snapshot.registered.is_empty() {
            self.theme_combo.set_model(Some(&StringList::new(&["No themes installed"])));
            self.theme_combo.set_sensitive(false);
            self.apply_btn.set_sensitive(false);
            return;
        }

        let names: Vec<&str> = snapshot.registered.iter().map(|t| t.name.as_str()).collect();
        self.theme_combo.set_model(Some(&StringList::new(&names)));
        if let Some(idx) = current {
            self.theme_combo.set_selected(idx as u32);
        }
        self.theme_combo.set_sensitive(true);
    }

    fn build_installed_row(
        &self,
        theme: &RegisteredTheme,
        active: bool,
        preview_path: Option<PathBuf>,
    ) -> adw::ActionRow {
        let row = adw::ActionRow::builder()
            .title(theme.name.as_str())
            .subtitle(if active { "Active boot splash" } else { "" })
            .tooltip_text(theme.marker.display().to_string())
            .build();

        let slot = GtkBox::builder().valign(Align::Center).build();
        row.add_prefix(&slot);
        match preview_path.filter(|path| path.is_file()) {
            Some(path) => fill_preview(&slot, Some(SMALL_PREVIEW_HEIGHT), move || {
                preview::load_animation(&path)
            }),
            None => slot.append(&missing_image()),
        }

        let uninstall_btn = Button::builder()
            .label("Uninstall")
            .valign(Align::Center)
            .css_classes(["destructive-action"])
            .build();
        row.add_suffix(&uninstall_btn);

        let theme = theme.clone();
        uninstall_btn.connect_clicked(clone!(
            #[strong(rename_to = this)] self,
            move |btn| this.confirm_uninstall(&theme, btn)
        ));

        row
    }

    fn confirm_uninstall(&self, theme: &RegisteredTheme, btn: &Button) {
        let dialog = adw::MessageDialog::builder()
            .transient_for(&self.window)
            .heading("Uninstall Theme?")
            .body(format!(
                "{} will be removed from the boot splash alternatives and {} deleted from the system.",
                theme.name,
                theme.marker.parent().unwrap_or(&theme.marker).display()
            ))
            .build();

        dialog.add_response("cancel", "Cancel");
        dialog.add_response("uninstall", "Uninstall");
        dialog.set_response_appearance("uninstall", adw::ResponseAppearance::Destructive);
        dialog.set_default_response(Some("cancel"));
        dialog.set_close_response("cancel");

        let this = self.clone();
        let theme = theme.clone();
        let btn = btn.clone();
        dialog.connect_response(None, move |_, response| {
            if response == "uninstall" {
                this.uninstall(&theme, &btn);
            }
        });

        dialog.present();
    }

    fn uninstall(&self, theme: &RegisteredTheme, btn: &Button) {
        if !self.begin_operation() {
            return;
        }
        btn.set_sensitive(false);
        show_toast(&self.toast_overlay, &format!("Uninstalling {}...", theme.name));

        let settings = (*self.settings).clone();
        let name = theme.name.clone();
        let theme = theme.clone();
        let btn = btn.clone();
        let this = self.clone();
        spawn_task(
            move || {
                let runner = SystemRunner::new(settings.elevation);
                installer::uninstall(&settings, &runner, &theme)
            },
            move |result| {
                this.end_operation();
                btn.set_sensitive(true);
                match result {
                    Ok(()) => show_toast(&this.toast_overlay, &format!("{} uninstalled.", name)),
                    Err(e) => show_toast(
                        &this.toast_overlay,
                        &format!("Uninstalling {} failed: {}", name, e),
                    ),
                }
                this.load_installed();
            },
        );
    }
}

/// Runs `work` on the blocking pool and hands its result back on the main loop.
fn spawn_task<T, W, D>(work: W, done: D)
where
    T: Send + 'static,
    W: FnOnce() -> Result<T> + Send + 'static,
    D: FnOnce(Result<T>) + 'static,
{
    glib::spawn_future_local(async move {
        let result = gio::spawn_blocking(work)
            .await
            .unwrap_or_else(|_| Err(PtmError::Background("worker thread panicked".to_string())));
        done(result);
    });
}

fn missing_image() -> Image {
    Image::builder()
        .icon_name("image-missing")
        .pixel_size(64)
        .build()
}

/// Loads a preview off the main thread and puts it into `slot`, falling back
/// to the missing-image icon.
fn fill_preview<W>(slot: &GtkBox, height: Option<i32>, load: W)
where
    W: FnOnce() -> Result<PreviewAnimation> + Send + 'static,
{
    let slot = slot.clone();
    spawn_task(load, move |result| match result {
        Ok(animation) if !animation.frames.is_empty() => {
            let picture = Picture::builder()
                .can_shrink(height.is_some())
                .css_classes(["theme-preview"])
                .build();
            if let Some(height) = height {
                picture.set_size_request(height * 2, height);
            }
            play_animation(&picture, animation);
            slot.append(&picture);
        }
        Ok(_) => slot.append(&missing_image()),
        Err(e) => {
            warn!(error = %e, "Preview could not be loaded");
            slot.append(&missing_image());
        }
    });
}

fn play_animation(picture: &Picture, animation: PreviewAnimation) {
    let frames: Vec<(gdk::MemoryTexture, u32)> = animation
        .frames
        .into_iter()
        .map(|frame| {
            let bytes = glib::Bytes::from_owned(frame.rgba);
            let texture = gdk::MemoryTexture::new(
                frame.width as i32,
                frame.height as i32,
                gdk::MemoryFormat::R8g8b8a8,
                &bytes,
                frame.width as usize * 4,
            );
            (texture, frame.delay_ms)
        })
        .collect();

    picture.set_paintable(Some(&frames[0].0));
    if frames.len() > 1 {
        schedule_frame(picture.downgrade(), Rc::new(frames), 0);
    }
}

// Stops once the picture has been dropped, e.g. after a list reload.
fn schedule_frame(
    picture: glib::WeakRef<Picture>,
    frames: Rc<Vec<(gdk::MemoryTexture, u32)>>,
    index: usize,
) {
    let delay = Duration::from_millis(u64::from(frames[index].1));
    glib::timeout_add_local_once(delay, move || {
        let Some(strong) = picture.upgrade() else {
            return;
        };
        let next = (index + 1) % frames.len();
        strong.set_paintable(Some(&frames[next].0));
        schedule_frame(picture, frames, next);
    });
}

fn show_toast(overlay: &adw::ToastOverlay, message: &str) {
    let toast = adw::Toast::new(message);
    overlay.add_toast(toast);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_latest_load_is_current() {
        let loads = LoadGeneration::default();
        let first = loads.next();
        let second = loads.next();

        assert!(!loads.is_current(first));
        assert!(loads.is_current(second));
    }

    #[test]
    fn overlapping_catalog_loads_apply_once() {
        let state = WindowState::default();
        let mut applied = Vec::new();

        // Two refreshes are in flight; they complete in either order.
        let early = state.catalog_load.next();
        let late = state.catalog_load.next();
        for generation in [late, early] {
            if state.catalog_load.is_current(generation) {
                applied.push(generation);
            }
        }

        assert_eq!(applied, [late]);
        // Installed-theme loads are tracked separately.
        assert!(state.installed_load.is_current(0));
    }
}
