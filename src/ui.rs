use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use arboard::Clipboard;
use ratatui::{
    prelude::*,
    style::Style,
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::otp::{Code, HashAlgorithm};

// One TOTP window; a copied code is useless after the next rollover.
const CLIPBOARD_LIFETIME_SECS: u64 = 30;
const LOW_TIME_SECS: u64 = 5;

const COLOR_SAND: Color = Color::Rgb(0xEB, 0xDB, 0xB2);
const COLOR_OLIVE: Color = Color::Rgb(0x98, 0x97, 0x1A);
const COLOR_MOSS: Color = Color::Rgb(0x67, 0x67, 0x1C);

#[derive(Clone, Copy)]
struct OverlayTheme {
    border: Color,
    title: Color,
    text: Color,
    bg: Color,
}

fn themed_overlay(title: &str) -> OverlayTheme {
    match title {
        "Add account" => OverlayTheme {
            border: COLOR_OLIVE,
            title: COLOR_SAND,
            text: COLOR_SAND,
            bg: Color::Rgb(0x1D, 0x21, 0x10),
        },
        "Rename account" => OverlayTheme {
            border: Color::Rgb(0xB3, 0xB2, 0x3A),
            title: COLOR_OLIVE,
            text: COLOR_SAND,
            bg: Color::Rgb(0x20, 0x23, 0x12),
        },
        "Confirm delete" => OverlayTheme {
            border: Color::Rgb(0xB3, 0x88, 0x45),
            title: Color::Rgb(0xF0, 0xD8, 0xA8),
            text: COLOR_SAND,
            bg: Color::Rgb(0x2A, 0x1C, 0x11),
        },
        "Confirm quit" => OverlayTheme {
            border: Color::Rgb(0xA7, 0xA2, 0x36),
            title: Color::Rgb(0xE6, 0xD8, 0xB2),
            text: COLOR_SAND,
            bg: Color::Rgb(0x25, 0x24, 0x13),
        },
        _ => OverlayTheme {
            border: COLOR_MOSS,
            title: COLOR_SAND,
            text: COLOR_SAND,
            bg: Color::Rgb(0x1E, 0x20, 0x12),
        },
    }
}

fn centered_overlay_area(frame_size: Rect, lines: &[String]) -> Rect {
    // Glyph count, not byte length; hint lines carry arrows like ↑/↓.
    let maxw = lines.iter().map(|s| s.chars().count()).max().unwrap_or(0) as u16 + 4;
    let maxh = lines.len() as u16 + 2;
    Rect::new(
        (frame_size.width.saturating_sub(maxw)) / 2,
        (frame_size.height.saturating_sub(maxh)) / 2,
        maxw.min(frame_size.width),
        maxh.min(frame_size.height),
    )
}

fn render_overlay(f: &mut Frame<'_>, lines: &[String], title: &str) {
    let area = centered_overlay_area(f.size(), lines);
    let theme = themed_overlay(title);
    let paragraph = Paragraph::new(
        lines
            .iter()
            .map(|l| Line::from(l.as_str()))
            .collect::<Vec<Line>>(),
    )
    .style(Style::default().fg(theme.text).bg(theme.bg))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(
                title,
                Style::default()
                    .fg(theme.title)
                    .add_modifier(Modifier::BOLD),
            ))
            .border_style(
                Style::default()
                    .fg(theme.border)
                    .add_modifier(Modifier::BOLD),
            )
            .style(Style::default().bg(theme.bg)),
    );
    f.render_widget(Clear, area);
    f.render_widget(paragraph, area);
}

/// Everything the list pane needs for one account, computed per redraw.
pub struct AccountRow {
    pub name: String,
    /// None when the stored secret no longer generates (shown as an error).
    pub code: Option<Code>,
}

pub struct DetailInfo {
    pub name: String,
    pub algorithm: HashAlgorithm,
    pub digits: u32,
    pub period: u64,
}

pub struct ViewState {
    pub rows: Vec<AccountRow>,
    pub selected: usize,
    pub detail: Option<DetailInfo>,
    pub filter: Option<String>,
    pub remaining: u64,
    pub period: u64,
    pub overlay: Option<Vec<String>>,
    pub overlay_title: Option<String>,
    pub delete_overlay: Option<String>,
    pub quit_overlay: Option<Vec<String>>,
    pub status: String,
}

fn code_color(remaining: u64) -> Color {
    if remaining < LOW_TIME_SECS {
        Color::Red
    } else {
        COLOR_SAND
    }
}

pub fn draw(f: &mut Frame<'_>, state: &ViewState) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(3)])
        .split(f.size());

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(60), // accounts + codes
            Constraint::Percentage(40), // detail
        ])
        .split(layout[0]);

    // Accounts list with their current codes
    let items: Vec<ListItem> = if state.rows.is_empty() {
        let hint = if state.filter.is_some() {
            "No accounts match the filter"
        } else {
            "No accounts. Press n to add one"
        };
        vec![ListItem::new(hint)]
    } else {
        state
            .rows
            .iter()
            .map(|row| {
                let code_span = match &row.code {
                    Some(code) => Span::styled(
                        code.spaced(),
                        Style::default()
                            .fg(code_color(state.remaining))
                            .add_modifier(Modifier::BOLD),
                    ),
                    None => Span::styled("KEY ERROR", Style::default().fg(Color::Red)),
                };
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{:<24} ", row.name)),
                    code_span,
                ]))
            })
            .collect()
    };
    let mut list_state = ListState::default();
    if !state.rows.is_empty() {
        list_state.select(Some(state.selected.min(state.rows.len() - 1)));
    }
    let title = match &state.filter {
        Some(filter) => format!("Accounts (filter: {filter})"),
        None => "Accounts".to_string(),
    };
    let list = List::new(items)
        .block(Block::default().title(title).borders(Borders::ALL))
        .highlight_symbol("▶ ")
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .bg(Color::Rgb(40, 40, 40))
                .add_modifier(Modifier::BOLD),
        );
    f.render_stateful_widget(list, body[0], &mut list_state);

    // Detail pane
    let detail_block = Block::default().title("Details").borders(Borders::ALL);
    let detail_lines = if let Some(detail) = &state.detail {
        let code_line = match state
            .rows
            .get(state.selected.min(state.rows.len().saturating_sub(1)))
            .and_then(|row| row.code.as_ref())
        {
            Some(code) => Line::from(vec![
                Span::raw("Code: "),
                Span::styled(
                    code.spaced(),
                    Style::default()
                        .fg(code_color(state.remaining))
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            None => Line::from(Span::styled(
                "Code: unavailable (bad secret)",
                Style::default().fg(Color::Red),
            )),
        };
        vec![
            Line::from(format!("Account: {}", detail.name)),
            Line::from(format!("Algorithm: {}", detail.algorithm)),
            Line::from(format!("Digits: {}", detail.digits)),
            Line::from(format!("Window: {}s", detail.period)),
            code_line,
            Line::from(format!("Refreshes in: {}s", state.remaining)),
            Line::from("Secret: (hidden)"),
        ]
    } else {
        vec![Line::from("No account selected.")]
    };
    let detail = Paragraph::new(detail_lines)
        .wrap(Wrap { trim: true })
        .block(detail_block);
    f.render_widget(detail, body[1]);

    // Footer: countdown bar for the current window, or the status line
    let footer_line = if state.status.is_empty() {
        countdown_line(state.remaining, state.period)
    } else {
        Line::from(state.status.clone())
    };
    let footer = Paragraph::new(footer_line).block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, layout[1]);

    if let Some(lines) = &state.overlay {
        let title = state.overlay_title.as_deref().unwrap_or("Overlay");
        render_overlay(f, lines, title);
    }

    if let Some(lines) = &state.quit_overlay {
        render_overlay(f, lines, "Confirm quit");
    }

    if let Some(msg) = &state.delete_overlay {
        let text = vec![msg.clone(), "".to_string(), "[y] Yes   [n] No".to_string()];
        render_overlay(f, &text, "Confirm delete");
    }
}

fn countdown_line(remaining: u64, period: u64) -> Line<'static> {
    let total = 30usize;
    let filled = if period == 0 {
        0
    } else {
        ((remaining as usize) * total / period as usize).min(total)
    };
    let empty = total - filled;
    let color = code_color(remaining);
    Line::from(vec![
        Span::raw(format!("Refresh in {remaining:>2}s ")),
        Span::raw("["),
        Span::styled("=".repeat(filled), Style::default().fg(color)),
        Span::styled("-".repeat(empty), Style::default().fg(Color::DarkGray)),
        Span::raw("]"),
    ])
}

/// Puts the digits-only code on the clipboard and clears it after one window.
pub fn copy_code_to_clipboard(code: &Code) -> Result<()> {
    let mut clipboard = Clipboard::new().map_err(|e| anyhow!("Clipboard unavailable: {e}"))?;
    clipboard
        .set_text(code.compact())
        .map_err(|e| anyhow!("Failed to set clipboard: {e}"))?;
    let mut clip = clipboard;
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(CLIPBOARD_LIFETIME_SECS));
        let _ = clip.set_text(String::new());
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_width_counts_glyphs_not_bytes() {
        let lines = vec!["↑/↓ move fields".to_string()];
        let area = centered_overlay_area(Rect::new(0, 0, 100, 40), &lines);
        assert_eq!(area.width, "↑/↓ move fields".chars().count() as u16 + 4);
    }

    #[test]
    fn overlay_is_clamped_to_the_frame() {
        let lines = vec!["x".repeat(300)];
        let area = centered_overlay_area(Rect::new(0, 0, 80, 24), &lines);
        assert!(area.width <= 80);
        assert!(area.height <= 24);
    }
}
