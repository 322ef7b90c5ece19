use crate::input::{collect_input_nonblocking, map_event_to_action, UiAction};
use crate::render::{draw_footer, draw_help, draw_room, draw_shop, Terminal};
use log::{info, warn};
use petroom::config::{save_settings_atomic, Paths, Settings};
use petroom::sim::ActionOutcome;
use petroom::Session;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scene {
    Room,
    Shop,
    Help,
}

pub(crate) struct App {
    settings: Settings,
    paths: Paths,
    session: Session,
    term: Terminal,
    scene: Scene,
    shop_cursor: usize,
    notice: Option<(String, Instant)>,
    should_quit: bool,
}

impl App {
    pub(crate) fn new(settings: Settings, paths: Paths, session: Session) -> anyhow::Result<Self> {
        let term = Terminal::begin()?;
        Ok(Self {
            settings,
            paths,
            session,
            term,
            scene: Scene::Room,
            shop_cursor: 0,
            notice: None,
            should_quit: false,
        })
    }

    pub(crate) fn run(mut self) -> anyhow::Result<()> {
        let fps = self.settings.fps_cap.clamp(5, 120);
        let frame_dt = Duration::from_secs_f32(1.0 / fps as f32);

        while !self.should_quit {
            let frame_start = Instant::now();
            self.term.resize_if_needed()?;

            for ev in collect_input_nonblocking(frame_dt)? {
                if let Some(action) = map_event_to_action(self.scene, ev) {
                    self.apply(action);
                }
                if self.should_quit {
                    break;
                }
            }

            self.session.pump();
            if self
                .notice
                .as_ref()
                .is_some_and(|(_, until)| Instant::now() >= *until)
            {
                self.notice = None;
            }

            self.render_frame()?;
            spin_sleep(frame_dt, frame_start);
        }

        self.term.end()?;
        if let Err(e) = self.session.shutdown() {
            warn!("final flush failed: {e}");
            eprintln!("{}", e.user_message());
        }
        save_settings_atomic(&self.paths.settings_path, &self.settings)?;
        Ok(())
    }

    fn apply(&mut self, action: UiAction) {
        match action {
            UiAction::Quit => self.should_quit = true,
            UiAction::Perform(kind) => {
                if self.session.perform(kind) == ActionOutcome::TooTired {
                    self.flash("Too tired to play. Let it sleep first.");
                }
            }
            UiAction::ShopToggle => {
                self.scene = match self.scene {
                    Scene::Shop => Scene::Room,
                    _ => Scene::Shop,
                };
            }
            UiAction::HelpToggle => {
                self.scene = match self.scene {
                    Scene::Help => Scene::Room,
                    _ => Scene::Help,
                };
            }
            UiAction::Back => self.scene = Scene::Room,
            UiAction::ShopMove(delta) => {
                let len = self.session.shop().catalog().len();
                if len > 0 {
                    let next = self.shop_cursor as i64 + i64::from(delta);
                    self.shop_cursor = next.rem_euclid(len as i64) as usize;
                }
            }
            UiAction::Buy => {
                let Some(item) = self.selected_item() else {
                    return;
                };
                match self.session.purchase(&item) {
                    Ok(bought) => {
                        info!("bought {}", bought.item_id);
                        self.flash("Purchased!");
                    }
                    Err(e) => info!("purchase of {item} refused: {}", e.code()),
                }
            }
            UiAction::EquipToggle => {
                let Some(item) = self.selected_item() else {
                    return;
                };
                let equipped = self
                    .session
                    .shop()
                    .owned()
                    .iter()
                    .any(|p| p.item_id == item && p.is_equipped);
                if self.session.set_equipped(&item, !equipped).is_ok() {
                    self.flash(if equipped { "Unequipped." } else { "Equipped!" });
                }
            }
        }
    }

    fn selected_item(&self) -> Option<String> {
        self.session
            .shop()
            .catalog()
            .get(self.shop_cursor)
            .map(|i| i.id.clone())
    }

    fn flash(&mut self, text: &str) {
        self.notice = Some((text.to_string(), Instant::now() + Duration::from_secs(2)));
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        self.term.cur.clear();
        draw_room(&mut self.term.cur, &self.session, self.settings.enable_color);
        match self.scene {
            Scene::Shop => draw_shop(&mut self.term.cur, &self.session, self.shop_cursor),
            Scene::Help => draw_help(&mut self.term.cur),
            Scene::Room => {}
        }
        let notice = self.notice.as_ref().map(|(t, _)| t.as_str());
        draw_footer(&mut self.term.cur, &self.session, self.scene, notice);
        self.term.present()
    }
}

fn spin_sleep(target: Duration, start: Instant) {
    let end = start + target;
    loop {
        let t = Instant::now();
        if t >= end {
            break;
        }
        let left = end - t;
        if left > Duration::from_millis(2) {
            std::thread::sleep(Duration::from_millis(1));
        } else {
            std::hint::spin_loop();
        }
    }
}
