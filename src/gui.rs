use chrono::{NaiveDate, NaiveTime, TimeZone};
use eframe::egui;
use egui_plot::{Line, Plot, PlotPoints};
use std::time::Duration;

use crate::app::App;
use crate::config::{APP_TITLE, CHART_WINDOW_SIZE, NOTICE_WINDOW_SIZE};
use crate::session::{Chart, Effect, LineStyle, Notice, NoticeLevel};

// ──────────────────────────────────────────────────────────────────────────────
// Color Palette
// ──────────────────────────────────────────────────────────────────────────────

const ACCENT_BLUE: egui::Color32 = egui::Color32::from_rgb(59, 130, 246);
const ACCENT_GREEN: egui::Color32 = egui::Color32::from_rgb(34, 197, 94);
const ACCENT_RED: egui::Color32 = egui::Color32::from_rgb(239, 68, 68);
const ACCENT_YELLOW: egui::Color32 = egui::Color32::from_rgb(250, 204, 21);
const ACCENT_ORANGE: egui::Color32 = egui::Color32::from_rgb(251, 146, 60);
const ACCENT_CYAN: egui::Color32 = egui::Color32::from_rgb(34, 211, 238);
const ACCENT_PURPLE: egui::Color32 = egui::Color32::from_rgb(168, 85, 247);

const BG_DARK: egui::Color32 = egui::Color32::from_rgb(15, 15, 20);
const BG_CARD: egui::Color32 = egui::Color32::from_rgb(24, 24, 32);
const BG_ELEVATED: egui::Color32 = egui::Color32::from_rgb(32, 32, 44);
const TEXT_PRIMARY: egui::Color32 = egui::Color32::from_rgb(226, 232, 240);
const TEXT_SECONDARY: egui::Color32 = egui::Color32::from_rgb(148, 163, 184);
const BORDER_SUBTLE: egui::Color32 = egui::Color32::from_rgb(51, 51, 68);

const SERIES_COLORS: [egui::Color32; 7] = [
    ACCENT_CYAN,
    ACCENT_YELLOW,
    ACCENT_GREEN,
    ACCENT_ORANGE,
    ACCENT_PURPLE,
    ACCENT_RED,
    ACCENT_BLUE,
];

const LIVE_REPAINT_INTERVAL: Duration = Duration::from_millis(250);

pub struct GuiApp {
    app: App,
    // Bumped on every dismissal so each effect gets a fresh window.
    shown: u64,
}

impl GuiApp {
    pub fn new(app: App) -> Self {
        Self { app, shown: 0 }
    }

    /// Installs the dark theme once; every viewport shares the context style.
    pub fn install_theme(ctx: &egui::Context) {
        ctx.set_style(themed(&ctx.style()));
    }
}

fn themed(base: &egui::Style) -> egui::Style {
    let mut style = base.clone();
    let visuals = &mut style.visuals;

    visuals.dark_mode = true;
    visuals.panel_fill = BG_DARK;
    visuals.window_fill = BG_CARD;
    visuals.window_rounding = egui::Rounding::same(8.0);
    visuals.extreme_bg_color = BG_ELEVATED;

    // Text fields and disabled buttons.
    let widgets = &mut visuals.widgets;
    for state in [&mut widgets.inactive, &mut widgets.hovered, &mut widgets.active] {
        state.rounding = egui::Rounding::same(6.0);
        state.fg_stroke = egui::Stroke::new(1.0, TEXT_PRIMARY);
    }
    widgets.inactive.bg_fill = BG_ELEVATED;
    widgets.hovered.bg_stroke = egui::Stroke::new(1.0, ACCENT_BLUE);
    widgets.noninteractive.fg_stroke = egui::Stroke::new(1.0, TEXT_SECONDARY);

    visuals.selection.bg_fill = ACCENT_BLUE.linear_multiply(0.4);
    visuals.selection.stroke = egui::Stroke::new(1.0, ACCENT_BLUE);

    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style
}

impl eframe::App for GuiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.app.tick();

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_form(ui);
        });

        self.render_current_effect(ctx);

        if self.app.is_running() {
            ctx.request_repaint();
        } else if self.app.is_live() {
            ctx.request_repaint_after(LIVE_REPAINT_INTERVAL);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.app.stop_live();
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Main Window
// ──────────────────────────────────────────────────────────────────────────────

impl GuiApp {
    fn render_form(&mut self, ui: &mut egui::Ui) {
        let idle = !self.app.is_busy();

        egui::Frame::none()
            .fill(BG_CARD)
            .rounding(egui::Rounding::same(12.0))
            .stroke(egui::Stroke::new(1.0, BORDER_SUBTLE))
            .inner_margin(egui::Margin::same(12.0))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());

                ui.label(egui::RichText::new("Enter Stock Symbol:").size(13.0).strong().color(TEXT_PRIMARY));
                let input = ui.add(
                    egui::TextEdit::singleline(&mut self.app.symbol_input)
                        .desired_width(f32::INFINITY)
                        .hint_text("e.g. AAPL, MSFT, SPY..."),
                );
                if idle && input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    self.app.analyze();
                }

                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    if action_button(ui, "Add to Portfolio", ACCENT_GREEN, idle) {
                        self.app.add_to_portfolio();
                    }
                    if action_button(ui, "View Portfolio", BG_ELEVATED, idle) {
                        self.app.view_portfolio();
                    }
                });
                if action_button(ui, "Analyze Portfolio", ACCENT_PURPLE, idle) {
                    self.app.analyze_portfolio();
                }

                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new("Start Date:").size(12.0).color(TEXT_SECONDARY));
                    ui.add(egui::TextEdit::singleline(&mut self.app.start_input).desired_width(90.0));
                    ui.label(egui::RichText::new("End Date:").size(12.0).color(TEXT_SECONDARY));
                    ui.add(egui::TextEdit::singleline(&mut self.app.end_input).desired_width(90.0));
                });

                ui.add_space(4.0);
                ui.horizontal(|ui| {
                    if action_button(ui, "Analyze", ACCENT_BLUE, idle) {
                        self.app.analyze();
                    }
                    if action_button(ui, "Predict", ACCENT_ORANGE, idle) {
                        self.app.predict();
                    }

                    let live_text = if self.app.is_live() { "Stop Live" } else { "Live" };
                    if action_button(ui, live_text, BG_ELEVATED, true) {
                        self.app.toggle_live();
                    }
                    if self.app.is_running() {
                        ui.spinner();
                    }
                });

                ui.add_space(8.0);
                let label_color = if self.app.is_live() { ACCENT_CYAN } else { TEXT_SECONDARY };
                live_price_row(ui, self.app.live_symbol(), &self.app.live_label(), label_color);
            });
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Effect Windows
// ──────────────────────────────────────────────────────────────────────────────

impl GuiApp {
    /// Shows the front effect in its own viewport. Closing it reveals the next.
    fn render_current_effect(&mut self, ctx: &egui::Context) {
        let Some(effect) = self.app.current_effect() else {
            return;
        };

        let (title, size) = match effect {
            Effect::Notice(notice) => (format!("{} - {}", APP_TITLE, notice.title), NOTICE_WINDOW_SIZE),
            Effect::Chart(chart) => (chart.title.clone(), CHART_WINDOW_SIZE),
        };
        let id = egui::ViewportId::from_hash_of(("effect", self.shown));
        let builder = egui::ViewportBuilder::default()
            .with_title(title.clone())
            .with_inner_size(size);

        let dismissed = ctx.show_viewport_immediate(id, builder, |ctx, class| {
            let mut dismissed = false;
            let mut contents = |ui: &mut egui::Ui| match effect {
                Effect::Notice(notice) => dismissed |= render_notice(ui, notice),
                Effect::Chart(chart) => render_chart(ui, chart, self.shown),
            };

            if class == egui::ViewportClass::Embedded {
                // The backend cannot open extra windows; fall back to an egui window.
                let mut open = true;
                egui::Window::new(title.as_str())
                    .open(&mut open)
                    .collapsible(false)
                    .default_size(size)
                    .show(ctx, |ui| contents(ui));
                dismissed |= !open;
            } else {
                egui::CentralPanel::default().show(ctx, |ui| contents(ui));
                dismissed |= ctx.input(|i| i.viewport().close_requested());
            }
            dismissed
        });

        if dismissed {
            self.app.dismiss_current();
            self.shown += 1;
        }
    }
}

fn render_notice(ui: &mut egui::Ui, notice: &Notice) -> bool {
    let color = match notice.level {
        NoticeLevel::Info => TEXT_PRIMARY,
        NoticeLevel::Error => ACCENT_RED,
    };

    let mut ok = false;
    ui.vertical_centered(|ui| {
        ui.add_space(12.0);
        ui.label(egui::RichText::new(&notice.message).size(14.0).color(color));
        ui.add_space(16.0);
        ok = action_button(ui, "OK", ACCENT_BLUE, true);
    });
    ok || ui.input(|i| i.key_pressed(egui::Key::Enter))
}

fn render_chart(ui: &mut egui::Ui, chart: &Chart, seq: u64) {
    ui.vertical_centered(|ui| {
        ui.label(egui::RichText::new(&chart.title).size(16.0).strong().color(TEXT_PRIMARY));
    });

    egui::Frame::none()
        .fill(BG_CARD)
        .rounding(egui::Rounding::same(8.0))
        .stroke(egui::Stroke::new(1.0, BORDER_SUBTLE))
        .inner_margin(egui::Margin::same(8.0))
        .show(ui, |ui| {
            let plot = Plot::new(("chart", seq))
                .legend(egui_plot::Legend::default().position(egui_plot::Corner::LeftTop))
                .x_axis_label(chart.x_label.as_str())
                .y_axis_label(chart.y_label.as_str())
                .x_axis_formatter(|x, _range| format_timestamp(x.value, "%Y-%m"))
                .label_formatter(|name, value| {
                    format!("{}\nDate: {}\nPrice: ${:.2}", name, format_timestamp(value.x, "%Y-%m-%d"), value.y)
                })
                .show_grid(true)
                .allow_drag(true)
                .allow_zoom(true);

            plot.show(ui, |plot_ui| {
                for (i, series) in chart.series.iter().enumerate() {
                    let points: PlotPoints = series
                        .points
                        .iter()
                        .map(|&(date, price)| [date_to_x(date), price])
                        .collect();
                    let mut line = Line::new(points)
                        .name(&series.name)
                        .color(SERIES_COLORS[i % SERIES_COLORS.len()])
                        .width(1.8);
                    if series.style == LineStyle::Dashed {
                        line = line.style(egui_plot::LineStyle::Dashed { length: 8.0 });
                    }
                    plot_ui.line(line);
                }
            });
        });
}

fn date_to_x(date: NaiveDate) -> f64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64
}

fn format_timestamp(x: f64, fmt: &str) -> String {
    chrono::Utc
        .timestamp_opt(x as i64, 0)
        .map(|dt| dt.format(fmt).to_string())
        .single()
        .unwrap_or_default()
}

// ──────────────────────────────────────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn live_price_row(ui: &mut egui::Ui, symbol: Option<&str>, label: &str, color: egui::Color32) {
    ui.horizontal(|ui| {
        ui.label(egui::RichText::new(label).size(13.0).strong().color(color));
        if let Some(symbol) = symbol {
            ui.label(egui::RichText::new(symbol).size(11.0).color(TEXT_SECONDARY));
        }
    });
}

fn action_button(ui: &mut egui::Ui, text: &str, fill: egui::Color32, enabled: bool) -> bool {
    ui.add_enabled(
        enabled,
        egui::Button::new(
            egui::RichText::new(text)
                .size(13.0)
                .strong()
                .color(egui::Color32::WHITE),
        )
        .fill(if enabled { fill } else { BG_ELEVATED })
        .rounding(egui::Rounding::same(6.0)),
    )
    .clicked()
}
