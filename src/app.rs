use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use zeroize::Zeroize;

use crate::models::{Account, Store};
use crate::otp::{self, Totp, DEFAULT_PERIOD};
use crate::storage::{
    default_base_dir, ensure_parent_dir, key_path, load_config, load_or_create_key, load_store,
    persist_store, save_config, store_path, validate_store_dir,
};
use crate::ui::{copy_code_to_clipboard, draw, AccountRow, DetailInfo, ViewState};

const IDLE_TIMEOUT_SECS: u64 = 300;
const STATUS_MESSAGE_SECS: u64 = 2;
const NAV_HINT: &str =
    "↑/↓ move | Enter/c copy | n add | r rename | d delete | / filter | Esc quit";

pub fn run() -> Result<()> {
    let bin_name = executable_name();
    let mut args = std::env::args().skip(1);
    let mut self_check = false;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("{bin_name} v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                print_usage(&bin_name);
                return Ok(());
            }
            "--self-check" => self_check = true,
            other => {
                eprintln!("Unknown option: {other}");
                print_usage(&bin_name);
                return Ok(());
            }
        }
    }

    if self_check {
        #[cfg(debug_assertions)]
        {
            return run_self_check();
        }
        #[cfg(not(debug_assertions))]
        {
            return Err(anyhow!("--self-check is only available in development builds"));
        }
    }

    let _ = select_or_init_base_dir()?;
    let path = store_path()?;
    let key_file = key_path()?;
    ensure_parent_dir(&path)?;

    let mut key = load_or_create_key(&key_file)?;
    // Wrong key or corrupted ciphertext fails closed into an empty list.
    let mut store = load_store(&path, &key);

    let result = run_tui(&mut store, &key, &path);

    zeroize_sensitive(&mut store, &mut key);
    result
}

fn zeroize_sensitive(store: &mut Store, key: &mut [u8; 32]) {
    for account in &mut store.accounts {
        account.name.zeroize();
        account.secret.zeroize();
    }
    store.accounts.clear();
    store.accounts.shrink_to_fit();
    key.zeroize();
}

fn unix_now() -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| anyhow!("Clock error: {e}"))?;
    Ok(now.as_secs())
}

#[derive(Default)]
struct AddForm {
    active: bool,
    step: usize,
    name: String,
    secret: String,
    show_secret: bool,
}

#[derive(Default)]
struct RenameForm {
    active: bool,
    target_id: Option<String>,
    name: String,
}

#[derive(Default)]
struct FilterInput {
    active: bool,
    text: String,
}

struct PendingDelete {
    id: String,
    name: String,
}

fn run_tui(store: &mut Store, key: &[u8; 32], store_file: &Path) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, crossterm::cursor::Hide)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut selected: usize = 0;
    let mut add_form = AddForm::default();
    let mut rename_form = RenameForm::default();
    let mut filter_input = FilterInput::default();
    let mut filter: Option<String> = None;
    let mut pending_delete: Option<PendingDelete> = None;
    let mut delete_overlay: Option<String> = None;
    let mut quit_overlay = false;
    let mut status = NAV_HINT.to_string();
    let mut status_until: Option<Instant> = None;
    let mut last_activity = Instant::now();

    let result = (|| -> Result<()> {
        loop {
            if let Some(until) = status_until {
                if Instant::now() >= until {
                    status = NAV_HINT.to_string();
                    status_until = None;
                }
            }

            let timed_out = last_activity.elapsed() >= Duration::from_secs(IDLE_TIMEOUT_SECS);
            if timed_out {
                status = "Idle timeout reached. Exiting...".to_string();
            }

            let now = unix_now()?;
            let view = build_view(
                store,
                selected,
                filter.as_deref(),
                now,
                &add_form,
                &rename_form,
                &filter_input,
                delete_overlay.clone(),
                quit_overlay,
                &status,
            );
            terminal.draw(|f| draw(f, &view))?;

            if timed_out {
                break;
            }

            if event::poll(Duration::from_millis(200))? {
                match event::read()? {
                    Event::Key(key_event) => {
                        last_activity = Instant::now();
                        let previous_status = status.clone();
                        let toggle_visibility = matches!(
                            key_event.code,
                            KeyCode::Char('h') | KeyCode::Char('H')
                        ) && key_event.modifiers.contains(KeyModifiers::CONTROL);

                        if quit_overlay {
                            match key_event.code {
                                KeyCode::Char('y') => break,
                                KeyCode::Char('n') | KeyCode::Esc => quit_overlay = false,
                                _ => {}
                            }
                        } else if delete_overlay.is_some() {
                            match key_event.code {
                                KeyCode::Char('y') => {
                                    if let Some(target) = pending_delete.take() {
                                        store.accounts.retain(|a| a.id != target.id);
                                        let visible =
                                            visible_indices(store, filter.as_deref()).len();
                                        selected = selected.min(visible.saturating_sub(1));
                                        persist_store(store_file, store, key)?;
                                        status = format!("Deleted '{}'", target.name);
                                    }
                                    delete_overlay = None;
                                }
                                KeyCode::Char('n') | KeyCode::Esc => {
                                    delete_overlay = None;
                                    pending_delete = None;
                                    status = "Delete cancelled".into();
                                }
                                _ => {}
                            }
                        } else if add_form.active {
                            handle_add_modal(
                                key_event.code,
                                toggle_visibility,
                                &mut add_form,
                                store,
                                &mut selected,
                                &mut filter,
                                &mut status,
                                key,
                                store_file,
                            )?;
                        } else if rename_form.active {
                            handle_rename_modal(
                                key_event.code,
                                &mut rename_form,
                                store,
                                &mut status,
                                key,
                                store_file,
                            )?;
                        } else if filter_input.active {
                            match key_event.code {
                                KeyCode::Esc => {
                                    filter_input = FilterInput::default();
                                    filter = None;
                                    selected = 0;
                                    status = "Filter cleared".into();
                                }
                                KeyCode::Enter => {
                                    filter = if filter_input.text.trim().is_empty() {
                                        None
                                    } else {
                                        Some(filter_input.text.trim().to_string())
                                    };
                                    filter_input.active = false;
                                    selected = 0;
                                    status = match &filter {
                                        Some(f) => format!("Filtering on '{f}'"),
                                        None => "Filter cleared".into(),
                                    };
                                }
                                KeyCode::Backspace => {
                                    filter_input.text.pop();
                                    status = format!("Filter: {}", filter_input.text);
                                    filter = to_filter(&filter_input.text);
                                }
                                KeyCode::Char(c) => {
                                    filter_input.text.push(c);
                                    status = format!("Filter: {}", filter_input.text);
                                    filter = to_filter(&filter_input.text);
                                }
                                _ => {}
                            }
                        } else {
                            match key_event.code {
                                KeyCode::Esc => quit_overlay = true,
                                KeyCode::Up => {
                                    selected = selected.saturating_sub(1);
                                }
                                KeyCode::Down => {
                                    let max = visible_indices(store, filter.as_deref())
                                        .len()
                                        .saturating_sub(1);
                                    selected = (selected + 1).min(max);
                                }
                                KeyCode::Enter | KeyCode::Char('c') => {
                                    match selected_account(store, filter.as_deref(), selected) {
                                        Some(account) => {
                                            status = copy_current_code(account)?;
                                        }
                                        None => status = "No account selected".into(),
                                    }
                                }
                                KeyCode::Char('n') => {
                                    add_form = AddForm::default();
                                    add_form.active = true;
                                }
                                KeyCode::Char('r') => {
                                    match selected_account(store, filter.as_deref(), selected) {
                                        Some(account) => {
                                            rename_form = RenameForm {
                                                active: true,
                                                target_id: Some(account.id.clone()),
                                                name: account.name.clone(),
                                            };
                                            status =
                                                format!("Renaming '{}'", account.name);
                                        }
                                        None => status = "No account selected".into(),
                                    }
                                }
                                KeyCode::Char('d') => {
                                    match selected_account(store, filter.as_deref(), selected) {
                                        Some(account) => {
                                            pending_delete = Some(PendingDelete {
                                                id: account.id.clone(),
                                                name: account.name.clone(),
                                            });
                                            delete_overlay = Some(format!(
                                                "Delete account '{}'?",
                                                account.name
                                            ));
                                            status = "Confirm delete with y/n".into();
                                        }
                                        None => status = "No account to delete".into(),
                                    }
                                }
                                KeyCode::Char('/') => {
                                    filter_input = FilterInput {
                                        active: true,
                                        text: filter.clone().unwrap_or_default(),
                                    };
                                    status = format!("Filter: {}", filter_input.text);
                                }
                                _ => {}
                            }
                        }
                        if status != previous_status {
                            if status == NAV_HINT
                                || status == "Idle timeout reached. Exiting..."
                                || filter_input.active
                            {
                                status_until = None;
                            } else {
                                status_until =
                                    Some(Instant::now() + Duration::from_secs(STATUS_MESSAGE_SECS));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    })();

    teardown_terminal(&mut terminal);
    result
}

fn to_filter(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn visible_indices(store: &Store, filter: Option<&str>) -> Vec<usize> {
    store
        .accounts
        .iter()
        .enumerate()
        .filter(|(_, account)| match filter {
            Some(needle) => account
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        })
        .map(|(idx, _)| idx)
        .collect()
}

fn selected_account<'a>(
    store: &'a Store,
    filter: Option<&str>,
    selected: usize,
) -> Option<&'a Account> {
    let visible = visible_indices(store, filter);
    visible
        .get(selected.min(visible.len().saturating_sub(1)))
        .and_then(|&idx| store.accounts.get(idx))
}

fn copy_current_code(account: &Account) -> Result<String> {
    let now = unix_now()?;
    match Totp::new(account.secret.clone()).generate(now) {
        Ok(code) => match copy_code_to_clipboard(&code) {
            Ok(_) => Ok(format!(
                "Copied code for '{}' to clipboard for 30s",
                account.name
            )),
            Err(e) => Ok(format!("Clipboard error: {e}")),
        },
        Err(_) => Ok(format!("Cannot generate a code for '{}'", account.name)),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_view(
    store: &Store,
    selected: usize,
    filter: Option<&str>,
    now: u64,
    add_form: &AddForm,
    rename_form: &RenameForm,
    filter_input: &FilterInput,
    delete_overlay: Option<String>,
    quit_overlay: bool,
    status: &str,
) -> ViewState {
    let visible = visible_indices(store, filter);
    let rows: Vec<AccountRow> = visible
        .iter()
        .filter_map(|&idx| store.accounts.get(idx))
        .map(|account| AccountRow {
            name: account.name.clone(),
            code: Totp::new(account.secret.clone()).generate(now).ok(),
        })
        .collect();

    let detail = visible
        .get(selected.min(visible.len().saturating_sub(1)))
        .and_then(|&idx| store.accounts.get(idx))
        .map(|account| {
            let totp = Totp::new(account.secret.clone());
            DetailInfo {
                name: account.name.clone(),
                algorithm: totp.algorithm(),
                digits: totp.digits(),
                period: totp.period(),
            }
        });

    let (overlay, overlay_title) = if add_form.active {
        (build_add_overlay(add_form), Some("Add account".to_string()))
    } else if rename_form.active {
        (
            build_rename_overlay(rename_form),
            Some("Rename account".to_string()),
        )
    } else {
        (None, None)
    };

    let quit_prompt = if quit_overlay {
        Some(vec![
            "Quit?".to_string(),
            "".to_string(),
            "[y] Yes   [n] No".to_string(),
        ])
    } else {
        None
    };

    // The countdown bar replaces the hint when nothing else wants the footer.
    let footer_status = if status == NAV_HINT && !filter_input.active {
        String::new()
    } else {
        status.to_string()
    };

    ViewState {
        rows,
        selected,
        detail,
        filter: filter.map(|f| f.to_string()),
        remaining: DEFAULT_PERIOD - (now % DEFAULT_PERIOD),
        period: DEFAULT_PERIOD,
        overlay,
        overlay_title,
        delete_overlay,
        quit_overlay: quit_prompt,
        status: footer_status,
    }
}

fn build_add_overlay(form: &AddForm) -> Option<Vec<String>> {
    if !form.active {
        return None;
    }
    let secret_display = if form.show_secret {
        form.secret.clone()
    } else {
        "*".repeat(form.secret.chars().count())
    };
    let steps = [
        ("Account name", form.name.clone()),
        ("Base32 secret", secret_display),
    ];
    let mut lines = Vec::new();
    lines.push("Add account".to_string());
    lines.push("".to_string());
    for (idx, (label, val)) in steps.iter().enumerate() {
        let marker = if idx == form.step { ">" } else { " " };
        lines.push(format!("{marker} {label}: {val}"));
    }
    lines.push("Enter confirms; ↑/↓ move fields; Ctrl+h show/hide secret".to_string());
    Some(lines)
}

fn build_rename_overlay(form: &RenameForm) -> Option<Vec<String>> {
    if !form.active {
        return None;
    }
    Some(vec![
        "Rename account".to_string(),
        "".to_string(),
        format!("> New name: {}", form.name),
        "".to_string(),
        "Enter to save; Esc cancels".to_string(),
    ])
}

#[allow(clippy::too_many_arguments)]
fn handle_add_modal(
    key_code: KeyCode,
    toggle_visibility: bool,
    form: &mut AddForm,
    store: &mut Store,
    selected: &mut usize,
    filter: &mut Option<String>,
    status: &mut String,
    key: &[u8; 32],
    store_file: &Path,
) -> Result<()> {
    if toggle_visibility && form.step == 1 {
        form.show_secret = !form.show_secret;
        *status = if form.show_secret {
            "Secret visibility: visible".into()
        } else {
            "Secret visibility: hidden".into()
        };
        return Ok(());
    }

    match key_code {
        KeyCode::Esc => {
            form.secret.zeroize();
            *form = AddForm::default();
            *status = "Add cancelled".into();
        }
        KeyCode::Up | KeyCode::BackTab => {
            form.step = form.step.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Tab => {
            form.step = (form.step + 1).min(1);
        }
        KeyCode::Backspace => match form.step {
            0 => {
                form.name.pop();
            }
            _ => {
                form.secret.pop();
            }
        },
        KeyCode::Enter => {
            if form.step == 0 {
                form.step = 1;
            } else {
                let name = form.name.trim().to_string();
                if name.is_empty() {
                    *status = "Name required".into();
                    return Ok(());
                }
                let secret = otp::normalize_secret(&form.secret);
                // Validated once here; codes are generated without
                // re-validation from now on.
                if otp::validate_secret(&secret).is_err() {
                    *status = "Invalid secret: expected a Base32 key".into();
                    return Ok(());
                }
                store.accounts.push(Account {
                    id: crate::models::new_uuid(),
                    name: name.clone(),
                    secret,
                });
                persist_store(store_file, store, key)?;
                *filter = None;
                *selected = store.accounts.len().saturating_sub(1);
                *status = format!("Added '{name}'");
                form.secret.zeroize();
                *form = AddForm::default();
            }
        }
        KeyCode::Char(c) => match form.step {
            0 => form.name.push(c),
            _ => form.secret.push(c),
        },
        _ => {}
    }
    Ok(())
}

fn handle_rename_modal(
    key_code: KeyCode,
    form: &mut RenameForm,
    store: &mut Store,
    status: &mut String,
    key: &[u8; 32],
    store_file: &Path,
) -> Result<()> {
    match key_code {
        KeyCode::Esc => {
            *form = RenameForm::default();
            *status = "Rename cancelled".into();
        }
        KeyCode::Backspace => {
            form.name.pop();
        }
        KeyCode::Enter => {
            let name = form.name.trim().to_string();
            if name.is_empty() {
                *status = "Name cannot be empty".into();
                return Ok(());
            }
            let target = form.target_id.take();
            match target
                .and_then(|id| store.accounts.iter_mut().find(|a| a.id == id))
            {
                Some(account) => {
                    // Edit mutates the name only; the secret is immutable.
                    account.name = name.clone();
                    persist_store(store_file, store, key)?;
                    *status = format!("Renamed to '{name}'");
                }
                None => *status = "Account no longer exists".into(),
            }
            *form = RenameForm::default();
        }
        KeyCode::Char(c) => {
            form.name.push(c);
        }
        _ => {}
    }
    Ok(())
}

fn select_or_init_base_dir() -> Result<std::path::PathBuf> {
    use std::io::{self, Write};

    if let Some(cfg) = load_config()? {
        let dir = validate_store_dir(Path::new(&cfg.store_dir))?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        return Ok(dir);
    }
    let default = default_base_dir()?;
    loop {
        println!("Store directory not set. Enter path (must be inside your home).");
        println!("Press Enter to use default [{}]", default.display());
        print!("> ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let chosen = input.trim();
        let raw = if chosen.is_empty() {
            default.clone()
        } else {
            std::path::PathBuf::from(chosen)
        };

        let dir = match validate_store_dir(&raw) {
            Ok(path) => path,
            Err(e) => {
                println!("{e}. Try again.");
                continue;
            }
        };

        std::fs::create_dir_all(&dir)?;
        save_config(&dir)?;
        println!("Store directory set to {}", dir.display());
        return Ok(dir);
    }
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>) {
    disable_raw_mode().ok();
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        crossterm::cursor::Show
    )
    .ok();
    terminal.show_cursor().ok();
}

#[cfg(debug_assertions)]
fn run_self_check() -> Result<()> {
    use crate::storage::{config_path, KEY_FILE, STORE_FILE};
    use std::fs;

    let mut warnings = 0u32;
    let mut failures = 0u32;

    println!("Codebook self-check (development build)");

    let base_dir = match load_config()? {
        Some(cfg) => {
            println!("[PASS] Config found at {}", config_path()?.display());
            std::path::PathBuf::from(cfg.store_dir)
        }
        None => {
            let dir = crate::storage::default_base_dir()?;
            println!("[WARN] No config found; using default {}", dir.display());
            warnings += 1;
            dir
        }
    };

    let store_file = base_dir.join(STORE_FILE);
    let key_file = base_dir.join(KEY_FILE);

    if base_dir.exists() {
        println!("[PASS] Store directory exists: {}", base_dir.display());
    } else {
        println!(
            "[WARN] Store directory does not exist yet: {}",
            base_dir.display()
        );
        warnings += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if base_dir.exists() {
            let mode = fs::metadata(&base_dir)?.permissions().mode() & 0o777;
            if mode == 0o700 {
                println!("[PASS] Store directory permissions are 0o700");
            } else {
                println!(
                    "[WARN] Store directory permissions are {:o}, expected 700",
                    mode
                );
                warnings += 1;
            }
        }
        if key_file.exists() {
            let mode = fs::metadata(&key_file)?.permissions().mode() & 0o777;
            if mode == 0o600 {
                println!("[PASS] Key file permissions are 0o600");
            } else {
                println!("[WARN] Key file permissions are {:o}, expected 600", mode);
                warnings += 1;
            }
        }
    }

    if key_file.exists() {
        match load_or_create_key(&key_file) {
            Ok(key) => {
                println!("[PASS] Key file is readable");
                if store_file.exists() {
                    let store = load_store(&store_file, &key);
                    if store.accounts.is_empty() && store.revision == 0 {
                        println!(
                            "[WARN] Store loads empty; missing, corrupted, or key mismatch"
                        );
                        warnings += 1;
                    } else {
                        println!(
                            "[PASS] Store decrypts successfully (revision={}, accounts={})",
                            store.revision,
                            store.accounts.len()
                        );
                    }
                } else {
                    println!(
                        "[WARN] Store file does not exist yet: {}",
                        store_file.display()
                    );
                    warnings += 1;
                }
            }
            Err(e) => {
                println!("[FAIL] Key file is invalid: {e}");
                failures += 1;
            }
        }
    } else {
        println!("[WARN] Key file does not exist yet: {}", key_file.display());
        warnings += 1;
    }

    println!("Self-check complete: {failures} failure(s), {warnings} warning(s).");
    if failures > 0 {
        Err(anyhow!("Self-check failed"))
    } else {
        Ok(())
    }
}

fn print_usage(bin_name: &str) {
    eprintln!("Usage: {bin_name} [OPTIONS]");
    eprintln!("With no options, opens the authenticator UI.");
    #[cfg(debug_assertions)]
    eprintln!("      --self-check        Run integrity checks");
    eprintln!("  -V, --version           Show version and exit");
    eprintln!("  -h, --help              Show this help");
}

fn executable_name() -> String {
    let fallback = "codebook".to_string();
    let arg0 = match std::env::args().next() {
        Some(v) => v,
        None => return fallback,
    };
    let path = Path::new(&arg0);
    match path.file_name().and_then(|name| name.to_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(names: &[&str]) -> Store {
        let mut store = Store::default();
        for name in names {
            store.accounts.push(Account {
                id: crate::models::new_uuid(),
                name: name.to_string(),
                secret: "GEZDGNBVGY3TQOJQ".to_string(),
            });
        }
        store
    }

    #[test]
    fn filter_matches_case_insensitively() {
        let store = store_with(&["GitHub", "Mail", "gitlab"]);
        assert_eq!(visible_indices(&store, Some("git")), vec![0, 2]);
        assert_eq!(visible_indices(&store, Some("MAIL")), vec![1]);
        assert_eq!(visible_indices(&store, None), vec![0, 1, 2]);
    }

    #[test]
    fn selection_clamps_to_visible_accounts() {
        let store = store_with(&["GitHub", "Mail"]);
        assert_eq!(selected_account(&store, None, 5).unwrap().name, "Mail");
        assert!(selected_account(&store, Some("zzz"), 0).is_none());
    }
}
