//! Receipt layout and ESC/POS encoding.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use printbridge_common::PrintJob;
use serde::Deserialize;
use tracing::info;

use crate::printer::{PrintError, PrinterDevice};

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = b'\n';

/// Something that can turn a print job into paper.
#[async_trait]
pub trait JobPrinter: Send + Sync {
    async fn print(&self, job: &PrintJob) -> Result<(), PrintError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiptLayout {
    pub restaurant_name: String,
    pub tagline: Option<String>,
    pub footer: Vec<String>,
    pub currency: String,
    /// Characters per line at normal size (48 for 80 mm paper, 32 for 58 mm).
    pub line_width: usize,
    /// Offset from UTC used for the printed order time.
    pub utc_offset_minutes: i32,
}

impl Default for ReceiptLayout {
    fn default() -> Self {
        Self {
            restaurant_name: "RESTAURANT".into(),
            tagline: None,
            footer: vec!["Thank you for dining with us!".into(), "Visit again :)".into()],
            currency: "Rs.".into(),
            line_width: 48,
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

pub struct Column<'a> {
    pub text: &'a str,
    pub align: Align,
    /// Share of the line width, 0.0..=1.0.
    pub width: f32,
}

/// ESC/POS command buffer for Epson-compatible thermal printers.
pub struct EscPos {
    buf: Vec<u8>,
    width: usize,
}

impl EscPos {
    pub fn new(width: usize) -> Self {
        let mut buf = Vec::with_capacity(1024);
        // initialise, code page PC437
        buf.extend_from_slice(&[ESC, b'@', ESC, b't', 0]);
        Self {
            buf,
            width: width.max(8),
        }
    }

    pub fn align(&mut self, align: Align) -> &mut Self {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.buf.extend_from_slice(&[ESC, b'a', n]);
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'E', u8::from(on)]);
        self
    }

    /// Character magnification, 1..=8 in each direction.
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buf.extend_from_slice(&[GS, b'!', (w << 4) | h]);
        self
    }

    pub fn text_normal(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    pub fn println(&mut self, text: &str) -> &mut Self {
        self.buf.extend(sanitize(text).bytes());
        self.buf.push(LF);
        self
    }

    pub fn new_line(&mut self) -> &mut Self {
        self.buf.push(LF);
        self
    }

    pub fn draw_line(&mut self) -> &mut Self {
        self.buf.extend(std::iter::repeat(b'-').take(self.width));
        self.buf.push(LF);
        self
    }

    /// Lay columns out side by side; cells wrap onto extra lines.
    pub fn table(&mut self, columns: &[Column<'_>]) -> &mut Self {
        for line in layout_columns(columns, self.width) {
            self.buf.extend(line.bytes());
            self.buf.push(LF);
        }
        self
    }

    /// Feed a few lines and make a partial cut.
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', 3, GS, b'V', 1]);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Keep printable ASCII; everything outside the code page prints as `?`.
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            c if c.is_ascii_control() => ' ',
            c if c.is_ascii() => c,
            _ => '?',
        })
        .collect()
}

fn layout_columns(columns: &[Column<'_>], width: usize) -> Vec<String> {
    if columns.is_empty() {
        return Vec::new();
    }

    let mut widths: Vec<usize> = columns
        .iter()
        .map(|c| ((c.width.clamp(0.0, 1.0) * width as f32) as usize).max(1))
        .collect();
    let used: usize = widths[..widths.len() - 1].iter().sum();
    if let Some(last) = widths.last_mut() {
        *last = width.saturating_sub(used).max(1);
    }

    let cells: Vec<Vec<String>> = columns
        .iter()
        .zip(&widths)
        .map(|(c, &w)| wrap(&sanitize(c.text), w))
        .collect();
    let rows = cells.iter().map(Vec::len).max().unwrap_or(0);

    (0..rows)
        .map(|row| {
            let mut line = String::with_capacity(width);
            for ((cell, &w), column) in cells.iter().zip(&widths).zip(columns) {
                let text = cell.get(row).map(String::as_str).unwrap_or("");
                match column.align {
                    Align::Left => line.push_str(&format!("{text:<w$}")),
                    Align::Center => line.push_str(&format!("{text:^w$}")),
                    Align::Right => line.push_str(&format!("{text:>w$}")),
                }
            }
            line.trim_end().to_string()
        })
        .collect()
}

/// Word-wrap `text` to `width` columns, hard-splitting words that do not fit.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..width).collect());
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current.is_empty() { word.len() } else { current.len() + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn money(layout: &ReceiptLayout, amount: f64) -> String {
    format!("{}{:.2}", layout.currency, amount)
}

/// Encode the receipt for `job`.
pub fn compose(layout: &ReceiptLayout, job: &PrintJob) -> Vec<u8> {
    let mut p = EscPos::new(layout.line_width);

    p.align(Align::Center)
        .bold(true)
        .text_size(2, 2)
        .println(&layout.restaurant_name)
        .bold(false)
        .text_normal();
    if let Some(tagline) = &layout.tagline {
        p.println(tagline);
    }
    p.draw_line();

    let offset = layout
        .utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    let placed_at = job.created_at.with_timezone(&offset);

    p.align(Align::Left)
        .println(&format!("Order  : #{}", job.display_id()))
        .println(&format!("Date   : {}", placed_at.format("%d/%m/%Y, %I:%M %p")))
        .println(&format!("Type   : {}", job.service_type.label()));
    for (label, value) in job.location_lines() {
        p.println(&format!("{label:<7}: {value}"));
    }
    p.println(&format!("Name   : {}", job.customer_name))
        .println(&format!("Phone  : {}", job.customer_mobile))
        .draw_line();

    p.bold(true).println("ITEMS:").bold(false);
    for item in &job.items {
        let desc = format!("{} x{}", item.name, item.quantity);
        let total = money(layout, item.line_total());
        p.table(&[
            Column { text: &desc, align: Align::Left, width: 0.72 },
            Column { text: &total, align: Align::Right, width: 0.28 },
        ]);
    }
    p.draw_line();

    let total = money(layout, job.total_amount);
    p.bold(true)
        .table(&[
            Column { text: "TOTAL", align: Align::Left, width: 0.5 },
            Column { text: &total, align: Align::Right, width: 0.5 },
        ])
        .bold(false)
        .draw_line();

    p.align(Align::Center);
    for line in &layout.footer {
        p.println(line);
    }
    p.new_line().cut();

    p.into_bytes()
}

/// Renders receipts onto a physical printer.
pub struct ReceiptRenderer {
    layout: ReceiptLayout,
    device: Arc<dyn PrinterDevice>,
}

impl ReceiptRenderer {
    pub fn new(layout: ReceiptLayout, device: Arc<dyn PrinterDevice>) -> Self {
        Self { layout, device }
    }

    pub async fn render(&self, job: &PrintJob) -> Result<(), PrintError> {
        let bytes = compose(&self.layout, job);
        self.device.write_all(&bytes).await?;
        info!("receipt: printed Order #{}", job.display_id());
        Ok(())
    }
}

#[async_trait]
impl JobPrinter for ReceiptRenderer {
    async fn print(&self, job: &PrintJob) -> Result<(), PrintError> {
        self.render(job).await
    }
}
