use std::time::Instant;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Widget, Wrap},
};
use unicode_width::UnicodeWidthStr;
use wordrow::{
    chunker::{ChunkRow, ContextToken},
    hud::HudCounters,
    session::SessionStatus,
};

use crate::App;

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 1;
const PLACEHOLDER: &str = "___";

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let now = Instant::now();
        let session = &self.session;

        let bold_style = Style::default().add_modifier(Modifier::BOLD);
        let dim_style = Style::default().add_modifier(Modifier::DIM);
        let green_bold_style = Style::default().patch(bold_style).fg(Color::Green);
        let red_bold_style = Style::default().patch(bold_style).fg(Color::Red);
        let key_style = Style::default().patch(bold_style).fg(Color::Cyan);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .horizontal_margin(HORIZONTAL_MARGIN)
            .vertical_margin(VERTICAL_MARGIN)
            .constraints([
                Constraint::Length(1), // title
                Constraint::Min(3),    // context
                Constraint::Length(3), // live row
                Constraint::Length(3), // queued row
                Constraint::Length(1), // hud
                Constraint::Length(1), // progress
                Constraint::Length(1), // legend
            ])
            .split(area);

        Paragraph::new(Line::from(vec![
            Span::styled(self.plan.text.title.clone(), bold_style),
            Span::styled(
                format!("  {} · {} hands", self.plan.text.lang_full, self.input_mode),
                dim_style,
            ),
        ]))
        .alignment(Alignment::Center)
        .render(chunks[0], buf);

        let revealed = session.revealed_count();
        let context = current_context(&self.plan.prepared.context, session.live_row.as_ref());
        let context_spans: Vec<Span> = context
            .iter()
            .flat_map(|token| {
                let shown = if token.absolute_index < revealed {
                    Span::styled(token.surface.clone(), green_bold_style)
                } else {
                    Span::styled(PLACEHOLDER, dim_style)
                };
                [shown, Span::raw(" ")]
            })
            .collect();
        Paragraph::new(Line::from(context_spans))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .render(chunks[1], buf);

        if let Some(row) = &session.live_row {
            let border = if self.is_flashing(now) {
                red_bold_style
            } else {
                bold_style
            };
            row_line(row, &session.live_row_done, key_style, bold_style, dim_style)
                .block(Block::default().borders(Borders::ALL).border_style(border))
                .alignment(Alignment::Center)
                .render(chunks[2], buf);
        }

        if let Some(row) = &session.queued_row {
            row_line(row, &session.queued_row_done, dim_style, dim_style, dim_style)
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(dim_style)
                        .title(Span::styled("next", dim_style)),
                )
                .alignment(Alignment::Center)
                .render(chunks[3], buf);
        }

        let live_hud = HudCounters {
            active_ms: session.active_ms_at(now),
            ..session.hud
        };
        Paragraph::new(Span::styled(hud_text(&live_hud), bold_style))
            .alignment(Alignment::Center)
            .render(chunks[4], buf);

        let ratio = if session.total_rows == 0 {
            0.0
        } else {
            (session.hud.rows_completed as f64 / session.total_rows as f64).clamp(0.0, 1.0)
        };
        Gauge::default()
            .gauge_style(Style::default().fg(Color::Magenta))
            .ratio(ratio)
            .label(format!(
                "{}/{} rows · {} sentences",
                session.hud.rows_completed, session.total_rows, session.sentences_completed
            ))
            .render(chunks[5], buf);

        let legend = match session.status {
            SessionStatus::Ready => "(space) pause / (tab) switch hands / (esc) save & quit",
            SessionStatus::Paused => "(any key) resume / (esc) save & quit",
            SessionStatus::Completed | SessionStatus::Idle => "(any key) exit",
        };
        Paragraph::new(Span::styled(legend, Style::default().add_modifier(Modifier::ITALIC)))
            .alignment(Alignment::Center)
            .render(chunks[6], buf);

        match session.status {
            SessionStatus::Paused => overlay(
                area,
                buf,
                vec![Line::from(Span::styled(
                    "PAUSED - press any key to continue",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD | Modifier::ITALIC),
                ))],
            ),
            SessionStatus::Completed => overlay(
                area,
                buf,
                vec![
                    Line::from(Span::styled("Text complete", green_bold_style)),
                    Line::from(hud_text(&session.hud)),
                ],
            ),
            SessionStatus::Ready | SessionStatus::Idle => {}
        }
    }
}

/// Tokens of the sentence the live row belongs to; the last sentence once finished.
fn current_context<'a>(context: &'a [Vec<ContextToken>], live: Option<&ChunkRow>) -> &'a [ContextToken] {
    let index = match live {
        Some(row) => row.sentence_index,
        None => context.len().saturating_sub(1),
    };
    context.get(index).map(Vec::as_slice).unwrap_or(&[])
}

fn row_line<'a>(
    row: &'a ChunkRow,
    done: &[bool],
    key_style: Style,
    word_style: Style,
    done_style: Style,
) -> Paragraph<'a> {
    let mut spans = Vec::with_capacity(row.len() * 3);
    for (slot, label) in row.labels.iter().enumerate() {
        let token = &row.tokens[row.order[slot]];
        let is_done = done.get(slot).copied().unwrap_or(false);
        spans.push(Span::styled(format!("[{label}] "), key_style));
        if is_done {
            spans.push(Span::styled(
                " ".repeat(token.surface.width().max(1)),
                done_style,
            ));
        } else {
            spans.push(Span::styled(token.surface.as_str(), word_style));
        }
        spans.push(Span::raw("   "));
    }
    Paragraph::new(Line::from(spans))
}

fn hud_text(hud: &HudCounters) -> String {
    let secs = hud.active_ms / 1000;
    format!(
        "acc {}%  ·  streak {}  ·  mistakes {}  ·  {:.1} rows/min  ·  {}:{:02}",
        hud.accuracy_percent(),
        hud.streak,
        hud.mistakes_total,
        hud.rows_per_minute(),
        secs / 60,
        secs % 60
    )
}

fn overlay(area: Rect, buf: &mut Buffer, lines: Vec<Line>) {
    let width = lines
        .iter()
        .map(Line::width)
        .max()
        .unwrap_or(0)
        .saturating_add(4)
        .min(area.width as usize) as u16;
    let height = (lines.len() as u16 + 2).min(area.height);
    let popup = Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    };

    Clear.render(popup, buf);
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL))
        .render(popup, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordrow::chunker::{Hand, TokenCard};

    fn row() -> ChunkRow {
        ChunkRow {
            chunk_index: 0,
            sentence_index: 1,
            hand: Hand::Right,
            natural_hand: Hand::Right,
            labels: vec!['J', 'K'],
            tokens: vec![
                TokenCard {
                    surface: "hello".into(),
                    candidate: "hello".into(),
                    absolute_index: 3,
                },
                TokenCard {
                    surface: "world".into(),
                    candidate: "world".into(),
                    absolute_index: 4,
                },
            ],
            order: vec![1, 0],
            expected_order: vec![0, 1],
        }
    }

    #[test]
    fn context_follows_live_sentence() {
        let context = vec![
            vec![ContextToken {
                surface: "a".into(),
                absolute_index: 0,
            }],
            vec![ContextToken {
                surface: "b".into(),
                absolute_index: 1,
            }],
        ];
        assert_eq!(current_context(&context, Some(&row()))[0].surface, "b");
        assert_eq!(current_context(&context, None)[0].surface, "b");
        assert!(current_context(&[], None).is_empty());
    }

    #[test]
    fn row_shows_words_in_display_order() {
        let r = row();
        let style = Style::default();
        let mut buf = Buffer::empty(Rect::new(0, 0, 40, 1));
        row_line(&r, &[false, true], style, style, style).render(buf.area, &mut buf);
        let rendered: String = (0..40u16)
            .map(|x| buf[(x, 0u16)].symbol().to_string())
            .collect();
        assert!(rendered.starts_with("[J] world   [K]"));
        assert!(!rendered.contains("hello"));
    }

    #[test]
    fn hud_text_formats_time() {
        let hud = HudCounters {
            active_ms: 125_000,
            ..HudCounters::with_total(4)
        };
        assert!(hud_text(&hud).ends_with("2:05"));
    }
}
