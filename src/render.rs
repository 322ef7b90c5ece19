use crate::app::Scene;
use crossterm::{
    cursor, execute, queue,
    style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, BeginSynchronizedUpdate, Clear, ClearType, DisableLineWrap, EnableLineWrap,
        EndSynchronizedUpdate, EnterAlternateScreen, LeaveAlternateScreen,
    },
};
use petroom::error::Severity;
use petroom::Session;
use std::io::{self, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Cell {
    pub(crate) ch: char,
    pub(crate) fg: Color,
    pub(crate) bg: Color,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::White,
            bg: Color::Black,
        }
    }
}

pub(crate) struct CellBuffer {
    pub(crate) w: u16,
    pub(crate) h: u16,
    pub(crate) cells: Vec<Cell>,
}

impl CellBuffer {
    pub(crate) fn new(w: u16, h: u16) -> Self {
        Self {
            w,
            h,
            cells: vec![Cell::default(); (w as usize) * (h as usize)],
        }
    }

    fn idx(&self, x: u16, y: u16) -> usize {
        (y as usize) * (self.w as usize) + (x as usize)
    }

    pub(crate) fn set(&mut self, x: u16, y: u16, c: Cell) {
        if x < self.w && y < self.h {
            let i = self.idx(x, y);
            self.cells[i] = c;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.cells.fill(Cell::default());
    }
}

pub(crate) struct Terminal {
    out: io::Stdout,
    pub(crate) cols: u16,
    pub(crate) rows: u16,
    prev: CellBuffer,
    pub(crate) cur: CellBuffer,
}

impl Terminal {
    pub(crate) fn begin() -> anyhow::Result<Self> {
        let mut out = io::stdout();
        execute!(
            out,
            EnterAlternateScreen,
            cursor::Hide,
            DisableLineWrap,
            terminal::Clear(ClearType::All)
        )?;
        terminal::enable_raw_mode()?;

        let (cols, rows) = terminal::size()?;
        Ok(Self {
            out,
            cols,
            rows,
            prev: CellBuffer::new(cols, rows),
            cur: CellBuffer::new(cols, rows),
        })
    }

    pub(crate) fn end(&mut self) -> anyhow::Result<()> {
        queue!(
            self.out,
            ResetColor,
            Clear(ClearType::All),
            cursor::Show,
            EnableLineWrap,
            LeaveAlternateScreen
        )?;
        self.out.flush()?;
        terminal::disable_raw_mode()?;
        Ok(())
    }

    pub(crate) fn resize_if_needed(&mut self) -> anyhow::Result<bool> {
        let (c, r) = terminal::size()?;
        if c == self.cols && r == self.rows {
            return Ok(false);
        }
        self.cols = c;
        self.rows = r;
        self.prev = CellBuffer::new(c, r);
        self.cur = CellBuffer::new(c, r);
        Ok(true)
    }

    /// Write only the cells that changed since the last frame.
    pub(crate) fn present(&mut self) -> anyhow::Result<()> {
        queue!(self.out, BeginSynchronizedUpdate)?;

        let mut last_fg = None;
        let mut last_bg = None;
        for y in 0..self.rows {
            for x in 0..self.cols {
                let i = self.cur.idx(x, y);
                let c = self.cur.cells[i];
                if c == self.prev.cells[i] {
                    continue;
                }
                queue!(self.out, cursor::MoveTo(x, y))?;
                if last_fg != Some(c.fg) {
                    queue!(self.out, SetForegroundColor(c.fg))?;
                    last_fg = Some(c.fg);
                }
                if last_bg != Some(c.bg) {
                    queue!(self.out, SetBackgroundColor(c.bg))?;
                    last_bg = Some(c.bg);
                }
                queue!(self.out, Print(c.ch))?;
            }
        }

        queue!(self.out, ResetColor, EndSynchronizedUpdate)?;
        self.out.flush()?;
        self.prev.cells.copy_from_slice(&self.cur.cells);
        Ok(())
    }
}

pub(crate) fn draw_text(buf: &mut CellBuffer, x: u16, y: u16, s: &str, fg: Color) {
    for (i, ch) in s.chars().enumerate() {
        let xx = x.saturating_add(i as u16);
        if xx >= buf.w || y >= buf.h {
            break;
        }
        buf.set(
            xx,
            y,
            Cell {
                ch,
                fg,
                bg: Color::Black,
            },
        );
    }
}

fn bar(value01: f64, width: usize) -> String {
    let v = value01.clamp(0.0, 1.0);
    let fill = (v * width as f64 + 0.5) as usize;
    let mut s = String::with_capacity(width + 2);
    s.push('[');
    for i in 0..width {
        s.push(if i < fill { '█' } else { ' ' });
    }
    s.push(']');
    s
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Low => Color::Yellow,
        Severity::Medium => Color::DarkYellow,
        Severity::High => Color::Red,
    }
}

pub(crate) fn draw_room(buf: &mut CellBuffer, session: &Session, color: bool) {
    let fg = Color::White;
    let st = session.state();

    let who = session.user().map_or("guest", |u| u.as_str());
    let title = format!("Petroom  |  {who}  |  Coins: {}", st.coins);
    draw_text(buf, 1, 0, &title, fg);

    let meters = [
        ("Happy ", st.happiness, false),
        ("Hunger", st.hunger, true),
        ("Clean ", st.cleanliness, false),
        ("Energy", st.energy, false),
    ];
    for (i, (name, val, inverted)) in meters.iter().enumerate() {
        let good = if *inverted { 100.0 - val } else { *val };
        let tint = match (color, good) {
            (false, _) => fg,
            (true, g) if g < 25.0 => Color::Red,
            (true, g) if g < 50.0 => Color::Yellow,
            _ => Color::Green,
        };
        let line = format!("{name}: {} {:>5.1}", bar(val / 100.0, 20), val);
        draw_text(buf, 1, 2 + i as u16, &line, tint);
    }

    let face = match session.interaction() {
        Some(kind) => format!("(^o^)  *{}*", kind.name()),
        None if st.happiness < 30.0 => "(;_;)".to_string(),
        None => "(^_^)".to_string(),
    };
    draw_text(buf, 4, 8, &face, fg);

    if let Some(coins) = session.recent_earning() {
        draw_text(buf, 4, 9, &format!("+{coins} coins!"), Color::Yellow);
    }

    let owned = session.shop().owned();
    if !owned.is_empty() {
        let wearing: Vec<&str> = owned
            .iter()
            .filter(|p| p.is_equipped)
            .filter_map(|p| session.shop().item(&p.item_id))
            .map(|i| i.icon.as_str())
            .collect();
        if !wearing.is_empty() {
            draw_text(buf, 4, 7, &wearing.join(" "), fg);
        }
    }
}

pub(crate) fn draw_shop(buf: &mut CellBuffer, session: &Session, cursor: usize) {
    let fg = Color::White;
    let hi = Color::Yellow;
    let x = 40;

    let header = if session.shop().is_purchasing() {
        "Shop (purchasing...)"
    } else {
        "Shop"
    };
    draw_text(buf, x, 2, header, fg);

    for (i, item) in session.shop().catalog().iter().enumerate() {
        let owned = session
            .shop()
            .owned()
            .iter()
            .find(|p| p.item_id == item.id);
        let tag = match owned {
            Some(p) if p.is_equipped => "equipped",
            Some(_) => "owned",
            None => "",
        };
        let line = format!(
            "{} {} {:<14} {:>4}c  {}",
            if i == cursor { ">" } else { " " },
            item.icon,
            item.name,
            item.cost,
            tag
        );
        draw_text(buf, x, 4 + i as u16, &line, if i == cursor { hi } else { fg });
    }
}

pub(crate) fn draw_help(buf: &mut CellBuffer) {
    let lines = [
        "How to play",
        "",
        "F Feed   hunger -30, happiness +10",
        "C Clean  cleanliness +40, happiness +15",
        "S Sleep  energy +50, happiness +5",
        "P Play   happiness +25, energy -15 (needs 20 energy)",
        "",
        "A happy pet earns 1-3 coins per action.",
        "Tab opens the shop: Enter buys, E equips.",
        "",
        "Esc or H to close.",
    ];
    for (i, line) in lines.iter().enumerate() {
        draw_text(buf, 40, 2 + i as u16, line, Color::White);
    }
}

pub(crate) fn draw_footer(buf: &mut CellBuffer, session: &Session, scene: Scene, notice: Option<&str>) {
    let help = match scene {
        Scene::Room => "Keys: f feed | c clean | s sleep | p play | tab shop | h help | q quit",
        Scene::Shop => "Shop: up/down select | enter buy | e equip | tab back | q quit",
        Scene::Help => "Help: esc back | q quit",
    };
    let bottom = buf.h.saturating_sub(1);
    draw_text(buf, 1, bottom, help, Color::DarkGrey);

    if let Some(err) = session.error() {
        draw_text(
            buf,
            1,
            bottom.saturating_sub(1),
            err.user_message(),
            severity_color(err.severity()),
        );
    } else if let Some(text) = notice {
        draw_text(buf, 1, bottom.saturating_sub(1), text, Color::Green);
    }
}
